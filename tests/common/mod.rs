// every test crate uses a different part of the helpers
#![allow(dead_code)]

pub mod test_utils;
