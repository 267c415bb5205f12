//! List connected hardware random number generators.

use rngkit::{find_ports, BitBabbler};

fn main() -> Result<(), rngkit::RngError> {
    env_logger::init();

    let babblers = BitBabbler::detect()?;
    if babblers.is_empty() {
        println!("No BitBabbler devices found (0403:7840).");
    }
    for dev in &babblers {
        println!(
            "BitBabbler: {} [{}] {}",
            dev.device_path,
            dev.hardware_ids.join(", "),
            dev.friendly_name.as_deref().unwrap_or("(unnamed)")
        );
    }

    let ports = find_ports();
    if ports.is_empty() {
        println!("No TrueRNG serial ports found.");
    }
    for port in &ports {
        println!("TrueRNG: {port}");
    }

    Ok(())
}
