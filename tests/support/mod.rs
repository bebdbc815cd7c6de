// Each test crate uses a different subset of the helpers.
#![allow(dead_code)]

pub mod mock_driver;
