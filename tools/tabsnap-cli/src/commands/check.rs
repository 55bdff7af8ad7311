//! Check host tools.

use tabsnap_common::config::AppConfig;
use tabsnap_device_host::{all_required_available, check_capabilities, print_capability_report};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("TabSnap System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", AppConfig::path().display());
    println!();

    let capabilities = check_capabilities(&config.adb);
    print_capability_report(&capabilities);

    println!();
    if all_required_available(&capabilities) {
        println!("All required capabilities are available. TabSnap is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
