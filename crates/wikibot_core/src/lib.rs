pub mod batch;
pub mod config;
pub mod edit;
pub mod error;
pub mod fetch;
pub mod moved_redirects;
pub mod nav_format;
pub mod page;
pub mod paginate;
pub mod response;
pub mod runner;
pub mod session;
pub mod throttle;
pub mod transport;
pub mod unused_files;
pub mod usage;

#[cfg(test)]
mod testing;
