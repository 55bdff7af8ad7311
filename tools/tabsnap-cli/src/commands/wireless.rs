//! Switch the device to adb over Wi-Fi.

use tabsnap_common::config::AppConfig;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let mut controller = super::connect(config).await?;
    let result = controller.enable_wireless().await;
    super::finish(&mut controller).await;

    let endpoint = result?;
    println!("Wireless debugging enabled.");
    println!("Connect with: {} connect {endpoint}", config.adb.binary);
    Ok(())
}
