extern crate udstunnel;

use udstunnel::config;
use udstunnel::tunnel;

use super::utils;

#[allow(dead_code)] // Used from several test crates, each sees it as unused
pub async fn read() -> config::Config {
    let mut config = config::ConfigLoader::new()
        .with_filename("tests/udstunnel.conf")
        .load()
        .unwrap();

    config.listen_port = utils::find_free_port(Some(&config.listen_address));

    tunnel::log::setup(&None, &config.loglevel);
    config
}
