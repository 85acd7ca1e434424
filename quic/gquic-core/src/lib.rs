// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod connection;
pub mod counter;
#[cfg(feature = "alloc")]
pub mod crypto;
pub mod endpoint;
pub mod event;
#[cfg(feature = "alloc")]
pub mod frame;
pub mod packet;
pub mod random;
pub mod recovery;
pub mod stream;
pub mod time;
pub mod transmission;
pub mod transport;
pub mod ufloat16;
pub mod version;
