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

//! Seam between the protocol agnostic core and one hardware backend.

use crate::sync;
use crate::work;

use async_trait::async_trait;

use std::sync::Arc;

/// One mining backend (a family of hash boards). The backend consumes jobs
/// from the current job slot and pushes validated solutions back. It is
/// expected to observe `halt` and wind itself down when signaled.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Backend name for logs and status output
    fn name(&self) -> &'static str;

    /// Drive the hardware until halt
    async fn run(
        self: Arc<Self>,
        job_receiver: work::JobReceiver,
        solution_sender: work::SolutionSender,
        halt: sync::Receiver,
    );
}
