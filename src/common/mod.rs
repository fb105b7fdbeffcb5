pub mod client {
    pub mod models {
        pub mod auth;
        pub mod common;
        pub mod video;
    }
    pub mod client;
    pub mod error;
}

pub mod logger;
pub mod models;
pub mod wbi_utils;
