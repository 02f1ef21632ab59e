//! Safe Vanity Salt Miner CLI
//!
//! Usage:
//!   safe_miner mine -o 0xOwner1,0xOwner2 -t 2          # Mine on CPU threads
//!   safe_miner mine -o 0xOwner -b opencl --kernel k.cl  # Mine on a GPU
//!   safe_miner derive -o 0xOwner --nonce 0x1b01164d2f   # Preview one address
//!   safe_miner bench -d 30                              # Measure hashrate

use std::error::Error;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::info;
use rand::Rng;

use safe_miner::config::{BenchArgs, DeriveArgs, MineArgs};
use safe_miner::format::{format_duration, format_eta, format_hashrate, format_number};
use safe_miner::{
    Address, AddressDeriver, BestResult, Command, Config, MiningOptions, MiningSession, Progress,
    SessionState, WalletConfig,
};

type CliResult = Result<(), Box<dyn Error>>;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        process::exit(1);
    }

    let result = match &config.command {
        Command::Mine(args) => run_mine(args),
        Command::Derive(args) => run_derive(args),
        Command::Bench(args) => run_bench(args),
        Command::Devices => list_devices(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_mine(args: &MineArgs) -> CliResult {
    let wallet = args.wallet.wallet_config()?;
    let constants = args.deployment.constants()?;
    let provider = args.backend.provider()?;

    println!("Safe Vanity Salt Miner");
    println!("======================");
    for (i, owner) in wallet.owners().iter().enumerate() {
        println!("Owner {:<5} {}", i + 1, owner);
    }
    println!("Threshold:  {} of {}", wallet.threshold(), wallet.owners().len());
    println!("Factory:    {}", constants.factory);
    println!("Backend:    {}", args.backend.backend);
    println!("Geometry:   {}", args.backend.geometry());
    if let Some(target) = args.stop_at {
        println!("Target:     {} leading zero nibbles", target);
    }
    println!();

    let mut session = MiningSession::new(provider, AddressDeriver::new(constants), args.options());
    let stop = session.stop_handle();
    ctrlc::set_handler(move || stop.request_stop())?;
    let stop = session.stop_handle();

    session.start(&wallet)?;
    println!("Searching... (Press Ctrl+C to stop)\n");

    let mut shown: Option<BestResult> = None;
    loop {
        let state = session.wait(args.report_interval());
        let progress = session.snapshot();
        if progress.best != shown {
            if let Some(best) = &progress.best {
                print_best(best);
            }
            shown = progress.best;
        }
        match state {
            SessionState::Running => print_progress(&progress),
            SessionState::Error => {
                let err = session.last_error().map(|e| e.to_string());
                return Err(err.unwrap_or_else(|| "session failed".into()).into());
            }
            SessionState::Idle | SessionState::Paused => break,
        }
    }

    if stop.is_stop_requested() {
        println!("\nStopped by user.");
    } else {
        println!("\nSearch finished.");
    }
    if session.state() != SessionState::Idle {
        session.stop()?;
    }

    let progress = session.snapshot();
    print_summary(&progress);
    match &progress.best {
        Some(best) => {
            println!("\n=== Best Result ===");
            print_result(best);
            println!("Resume with:   --start-iteration {}", progress.iteration);
        }
        None => println!("\nNo result yet."),
    }
    Ok(())
}

fn run_derive(args: &DeriveArgs) -> CliResult {
    let wallet = args.wallet.wallet_config()?;
    let deriver = AddressDeriver::new(args.deployment.constants()?);
    let d = deriver.derive(&wallet, &args.nonce);

    println!("Initializer:      0x{}", hex::encode(&d.initializer));
    println!("Initializer hash: 0x{}", hex::encode(d.initializer_hash));
    println!("Salt nonce (dec): {}", args.nonce.to_decimal());
    println!("Salt nonce (hex): {}", args.nonce.to_hex());
    println!("Salt:             0x{}", hex::encode(d.salt));
    println!("Address:          {}", d.address);
    println!("Zero nibbles:     {}", d.address.leading_zero_nibbles());
    Ok(())
}

fn run_bench(args: &BenchArgs) -> CliResult {
    let mut owner = [0u8; 20];
    rand::thread_rng().fill(&mut owner);
    let wallet = WalletConfig::new(vec![Address::from_bytes(owner)], 1)?;
    let provider = args.backend.provider()?;
    let deriver = AddressDeriver::new(args.deployment.constants()?);

    println!("Benchmark");
    println!("=========");
    println!("Backend:    {}", args.backend.backend);
    println!("Geometry:   {}", args.backend.geometry());
    println!("Owner:      {}", wallet.owners()[0]);
    println!();

    let mut session = MiningSession::new(provider, deriver, MiningOptions::default());
    session.start(&wallet)?;

    let duration = Duration::from_secs(args.duration);
    loop {
        let state = session.wait(Duration::from_millis(250));
        let progress = session.snapshot();
        if state != SessionState::Running {
            if let Some(e) = session.last_error() {
                return Err(e.into());
            }
            break;
        }
        let done = match args.hashes {
            Some(limit) => progress.total_hashes >= limit,
            None => progress.elapsed >= duration,
        };
        if done {
            break;
        }
    }
    if session.state() != SessionState::Idle {
        session.stop()?;
    }

    let progress = session.snapshot();
    info!("Benchmark finished after {} iterations", progress.iteration);
    print_summary(&progress);
    Ok(())
}

#[cfg(feature = "gpu")]
fn list_devices() -> CliResult {
    let devices = safe_miner::backend::list_devices();
    if devices.is_empty() {
        println!("No OpenCL GPU devices found.");
    }
    for (i, name) in devices.iter().enumerate() {
        println!("[{}] {}", i, name);
    }
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn list_devices() -> CliResult {
    Err("built without the `gpu` feature; rebuild with --features gpu".into())
}

fn print_best(best: &BestResult) {
    println!(
        "New best: {} ({} zero nibbles) nonce {}",
        best.address(),
        best.address().leading_zero_nibbles(),
        best.nonce()
    );
}

fn print_result(best: &BestResult) {
    println!("Address:       {}", best.address());
    println!("Zero bytes:    {}", best.address().leading_zero_bytes());
    println!("Salt (dec):    {}", best.nonce().to_decimal());
    println!("Salt (hex):    {}", best.nonce().to_hex());
}

fn print_progress(progress: &Progress) {
    let next = progress
        .estimate
        .map(|e| {
            format!(
                " | next {} nibbles: {:.0}% so far, ETA {}",
                e.target_zero_nibbles,
                e.probability * 100.0,
                format_eta(e.seconds_remaining)
            )
        })
        .unwrap_or_default();
    println!(
        "[{:>7}] {} hashes ({}){}",
        format_duration(progress.elapsed),
        format_number(progress.total_hashes),
        format_hashrate(progress.hashrate),
        next
    );
}

fn print_summary(progress: &Progress) {
    println!("\n--- Final Statistics ---");
    println!("Total hashes:   {}", format_number(progress.total_hashes));
    println!("Time elapsed:   {:.2}s", progress.elapsed.as_secs_f64());
    println!("Average speed:  {}", format_hashrate(progress.hashrate));
}
