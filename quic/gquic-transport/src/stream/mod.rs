// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stream state: send buffering, receive reassembly, per-entity flow
//! control windows, and the stream lifecycle.

mod flow_controller;
mod receive_buffer;
mod send_buffer;
#[allow(clippy::module_inception)]
mod stream;

pub use flow_controller::*;
pub use receive_buffer::*;
pub use send_buffer::*;
pub use stream::*;
