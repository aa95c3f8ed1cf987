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

//! Transport seam of the board link: a raw byte stream (the shared UART of
//! the multi-drop bus) plus the one-hot board select lines.

use crate::error::Result;

use async_trait::async_trait;
use sysfs_gpio::{Direction, Pin};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Raw byte stream towards the hash boards. Implementations must not buffer
/// writes; a frame handed to `write` is expected to be on the wire when the
/// call returns.
#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever is available into `buf`, waiting for at least one
    /// byte. Timeouts are applied by the caller.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// One-hot selection of the board a transaction talks to. Exactly one board
/// is asserted between `select` and `release`.
pub trait BoardSelector: Send {
    fn board_count(&self) -> usize;
    fn select(&mut self, board: usize) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

/// Character device transport (the hash board UART exposed by the platform)
pub struct TtyTransport {
    device: File,
}

impl TtyTransport {
    pub async fn open(path: &str) -> Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await?;
        Ok(Self { device })
    }
}

#[async_trait]
impl Transport for TtyTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.device.write_all(bytes).await?;
        self.device.flush().await?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.device.read(buf).await?)
    }
}

/// Board select over sysfs GPIO lines, one pin per board slot
pub struct GpioSelector {
    pins: Vec<Pin>,
}

impl GpioSelector {
    pub fn new(pin_numbers: &[u64]) -> Result<Self> {
        let mut pins = Vec::with_capacity(pin_numbers.len());
        for number in pin_numbers {
            let pin = Pin::new(*number);
            pin.export()?;
            pin.set_direction(Direction::Low)?;
            pins.push(pin);
        }
        Ok(Self { pins })
    }
}

impl BoardSelector for GpioSelector {
    fn board_count(&self) -> usize {
        self.pins.len()
    }

    fn select(&mut self, board: usize) -> Result<()> {
        for (index, pin) in self.pins.iter().enumerate() {
            pin.set_value(if index == board { 1 } else { 0 })?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        for pin in self.pins.iter() {
            pin.set_value(0)?;
        }
        Ok(())
    }
}
