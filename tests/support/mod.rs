#![allow(dead_code)]

pub mod checkpoints;
pub mod helpers;
pub mod mock_gateway;
pub mod shard;
