pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod state;

pub mod crypto {
    pub mod csrf;
    pub mod password;
}

pub mod models {
    pub mod file;
    pub mod session;
    pub mod theme;
    pub mod user;
}

pub mod repositories {
    pub mod file;
    pub mod user;
}

pub mod stores;

pub mod services {
    pub mod listing;
    pub mod preview;
    pub mod shell;
    pub mod upload;
}

pub mod handlers {
    pub mod auth;
    pub mod files;
    pub mod shell;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod csrf;
}

pub mod validation {
    pub mod auth;
    pub mod upload;
}
