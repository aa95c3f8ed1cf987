// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

use cn_logging::macros::*;

use cnminer_ca1126::config;
use cnminer_ca1126::transport::{GpioSelector, TtyTransport};
use cnminer_ca1126::Backend;

use cnminer::hub;

use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let app = clap::App::new("cnminer")
        .version(cnminer::version::AGENT)
        .arg(
            clap::Arg::with_name("config")
                .long("config")
                .help("Set config file path")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("pool")
                .short("p")
                .long("pool")
                .value_name("URL")
                .help("Address of the stratum server (stratum+tcp://host:port)")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("user")
                .short("u")
                .long("user")
                .value_name("USERNAME.WORKERNAME")
                .help("Specify user and worker name")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("password")
                .long("password")
                .help("Worker password for the pool given with --pool")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("frequency")
                .long("frequency")
                .help("Set chip frequency (in MHz)")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("voltage")
                .long("voltage")
                .help("Set board voltage (in mV)")
                .required(false)
                .takes_value(true),
        );

    let matches = app.get_matches();

    let config_path = matches
        .value_of("config")
        .unwrap_or(config::DEFAULT_CONFIG_PATH);
    let mut configuration = if Path::new(config_path).exists() {
        config::Configuration::parse_file(config_path).expect("failed to read configuration")
    } else {
        config::Configuration::default()
    };

    // Add a pool from the command line
    if let Some(url) = matches.value_of("pool") {
        let user = matches.value_of("user").expect("missing 'user' argument");
        configuration.add_pool(url, user, matches.value_of("password"));
    }

    // Check if there's enough pools
    if !configuration.has_pools() {
        panic!("No pools specified.");
    }

    if let Some(value) = matches.value_of("frequency") {
        configuration.set_frequency(value.parse::<u32>().expect("not a number"));
    }
    if let Some(value) = matches.value_of("voltage") {
        configuration.set_voltage(value.parse::<u32>().expect("not a number"));
    }

    let resolved = configuration.resolve().expect("invalid configuration");

    let transport = TtyTransport::open(&resolved.uart_path)
        .await
        .expect("cannot open hash board UART");
    let selector =
        GpioSelector::new(&resolved.select_gpios).expect("cannot claim board select GPIOs");

    let core = hub::Core::new(resolved.descriptors.clone());
    let backend = Arc::new(Backend::new(
        resolved,
        Box::new(transport),
        Box::new(selector),
        core.stats(),
    ));

    let halt_sender = core.halt_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            halt_sender.do_stop().await;
        }
    });

    core.run(backend).await;
}
