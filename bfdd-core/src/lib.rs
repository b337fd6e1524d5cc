//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod debug;
pub mod error;
pub mod events;
pub mod master;
pub mod network;
pub mod packet;
pub mod session;
pub mod socket;
pub mod task;
pub mod tasks;
