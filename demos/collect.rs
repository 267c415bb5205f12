//! Collect random bits at a fixed interval from any available source.
//!
//! Usage: cargo run --example collect [bitb|trng|seeded|system]

use std::time::{Duration, UNIX_EPOCH};

use rngkit::{
    BabblerConfig, BitBabbler, CancelToken, RandomSource, SeededRng, SystemRng, TrueRng,
};

fn main() -> Result<(), rngkit::RngError> {
    env_logger::init();

    let kind = std::env::args().nth(1).unwrap_or_else(|| "system".into());
    let mut source: Box<dyn RandomSource> = match kind.as_str() {
        "bitb" => Box::new(BitBabbler::open(&BabblerConfig::default())?),
        "trng" => Box::new(TrueRng::open()?),
        "seeded" => Box::new(SeededRng::from_os_entropy()?),
        _ => Box::new(SystemRng::new()),
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).expect("installing Ctrl-C handler");
    }

    println!("collecting 256 bits every second from '{kind}' (Ctrl-C to stop)");
    source.collect_at_interval(256, Duration::from_secs(1), &cancel, &mut |batch| {
        let secs = batch
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        println!("{secs}  {} bits  {}", batch.bits_requested, hex::encode(&batch.data));
    })?;

    println!("stopped.");
    Ok(())
}
