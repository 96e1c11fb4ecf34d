use std::env::consts::{ARCH, OS};

use crate::PKG_NAME;
use crate::PKG_VERS;

pub fn init() -> std::io::Result<()> {
    let (_, librdkafka) = rdkafka::util::get_rdkafka_version();
    println!(
        "Name: {}\n\
		Release Version: {}\n\
		Target Arch: {} - {}\n\
		librdkafka: {}\n",
        PKG_NAME, PKG_VERS, OS, ARCH, librdkafka
    );
    Ok(())
}

/// Identifies this process to the broker.
pub fn user_agent() -> String {
    let (_, librdkafka) = rdkafka::util::get_rdkafka_version();
    format!("{}/{} rdkafka/{}", PKG_NAME, PKG_VERS, librdkafka)
}
