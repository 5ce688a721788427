mod cloud;
mod load;
mod services;

pub use cloud::{TestCloud, TestCloudBuilder};
pub use load::TestLoad;
pub use services::TestServices;

use log::LevelFilter;

pub fn init_test_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
