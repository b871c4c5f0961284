//! Coinflip operator CLI
//!
//! Drives the wagering engine over a persistent ledger. Identities are plain
//! names; each name maps to a fixed ledger address.

use clap::{Parser, Subcommand};
use coinflip::{
    config::{generate_sample_config, CoinFlipConfig, ConfigLoader},
    errors::EngineResult,
    engine::{CoinFlipEngine, EngineEvent, Instruction},
    ledger::{Address, Ledger, RequestId, UserBetRecord},
    randomness::VrfOracle,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{path::PathBuf, sync::Arc, time::Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Coinflip wagering engine CLI
#[derive(Parser)]
#[command(name = "coinflip")]
#[command(about = "Provably fair coin-flip wagering over a local ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Ledger directory (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Print action outcomes as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample configuration file
    InitConfig {
        #[arg(short, long, default_value = "coinflip.toml")]
        output: String,
    },

    /// Bootstrap the oracle network and create the global config and vault
    Init {
        /// Name of the authority identity
        #[arg(short, long, default_value = "admin")]
        authority: String,

        #[arg(short, long)]
        fee_bps: Option<u64>,

        #[arg(short, long)]
        max_bet: Option<u64>,
    },

    /// Credit an identity out of thin air (local ledger only)
    Airdrop {
        #[arg(short, long)]
        to: String,

        #[arg(short, long)]
        amount: u64,
    },

    /// Move funds from the authority into the vault
    Deposit {
        #[arg(short = 'u', long, default_value = "admin")]
        authority: String,

        #[arg(short, long)]
        amount: u64,
    },

    /// Move free vault funds back to the authority
    Withdraw {
        #[arg(short = 'u', long, default_value = "admin")]
        authority: String,

        #[arg(short, long)]
        amount: u64,
    },

    /// Change the house fee
    SetFee {
        #[arg(short = 'u', long, default_value = "admin")]
        authority: String,

        #[arg(short, long)]
        fee_bps: u64,
    },

    /// Change the max bet
    SetMaxBet {
        #[arg(short = 'u', long, default_value = "admin")]
        authority: String,

        #[arg(short, long)]
        max_bet: u64,
    },

    /// Hand the authority role to another identity
    TransferAuthority {
        #[arg(short = 'u', long, default_value = "admin")]
        authority: String,

        #[arg(short, long)]
        to: String,
    },

    /// Place a bet (guess 0 = heads, 1 = tails)
    Bet {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        guess: u8,

        #[arg(short, long)]
        amount: u64,

        /// Request nonce, defaults to the current unix time
        #[arg(short, long)]
        nonce: Option<u32>,
    },

    /// Fulfill one pending randomness request, or all of them
    Fulfill {
        /// Request id in hex
        #[arg(short, long)]
        request: Option<String>,
    },

    /// Settle the user's pending bet
    Claim {
        #[arg(short, long)]
        user: String,
    },

    /// Recover the escrow of an expired, unfulfilled bet
    Refund {
        #[arg(short, long)]
        user: String,
    },

    /// Show the vault and optionally a user's bet slot
    Status {
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Run many bettors against an in-memory ledger
    Simulate {
        #[arg(short, long, default_value = "8")]
        bettors: usize,

        #[arg(short, long, default_value = "25")]
        rounds: u32,

        /// Largest single wager
        #[arg(short, long, default_value = "20000000")]
        wager: u64,

        /// RNG seed for guesses and amounts
        #[arg(short, long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_directory = dir;
    }

    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::InitConfig { output } => {
            generate_sample_config(&output)?;
            println!("✅ Sample configuration written to {}", output);
            Ok(())
        }
        Commands::Simulate {
            bettors,
            rounds,
            wager,
            seed,
        } => run_simulation(bettors, rounds, wager, seed).await,
        command => run_command(&config, command, cli.json),
    }
}

fn init_tracing(config: &CoinFlipConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_filter()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("coinflip={}", level).into()),
        )
        .init();
}

fn run_command(
    config: &CoinFlipConfig,
    command: Commands,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = Arc::new(Ledger::open(&config.storage)?);
    let engine = CoinFlipEngine::from_config(ledger.clone(), config);
    let oracle = VrfOracle::from_seed_phrase(&config.oracle.signing_seed)?;

    match command {
        Commands::Init {
            authority,
            fee_bps,
            max_bet,
        } => {
            let treasury = Address::from_name(&config.oracle.treasury_label);
            oracle.bootstrap(&ledger, treasury, config.oracle.request_fee)?;

            let event = engine.execute(
                &Address::from_name(&authority),
                Instruction::Initialize {
                    fee_bps: fee_bps.unwrap_or(config.engine.default_fee_bps),
                    max_bet: max_bet.unwrap_or(config.engine.default_max_bet),
                },
            )?;
            report(&event, json)?;
            println!("   Oracle key: {}", oracle.public_key_hex());
        }
        Commands::Airdrop { to, amount } => {
            let balance = ledger.airdrop(&Address::from_name(&to), amount)?;
            println!("💸 {} now holds {}", to, balance);
        }
        Commands::Deposit { authority, amount } => {
            let event = engine.execute(&Address::from_name(&authority), Instruction::DepositSol { amount })?;
            report(&event, json)?;
        }
        Commands::Withdraw { authority, amount } => {
            let event = engine.execute(&Address::from_name(&authority), Instruction::WithdrawSol { amount })?;
            report(&event, json)?;
        }
        Commands::SetFee { authority, fee_bps } => {
            let event = engine.execute(&Address::from_name(&authority), Instruction::UpdateFee { fee_bps })?;
            report(&event, json)?;
        }
        Commands::SetMaxBet { authority, max_bet } => {
            let event = engine.execute(&Address::from_name(&authority), Instruction::UpdateMaxBet { max_bet })?;
            report(&event, json)?;
        }
        Commands::TransferAuthority { authority, to } => {
            let event = engine.execute(
                &Address::from_name(&authority),
                Instruction::TransferAuthority {
                    new_authority: Address::from_name(&to),
                },
            )?;
            report(&event, json)?;
        }
        Commands::Bet {
            user,
            guess,
            amount,
            nonce,
        } => {
            let bettor = Address::from_name(&user);
            let nonce = match nonce {
                Some(nonce) => nonce,
                None => default_nonce(ledger.now())?,
            };
            let request_id = RequestId::derive(nonce, &bettor);

            let event = engine.execute(
                &bettor,
                Instruction::PlaceBet {
                    request_id,
                    guess,
                    amount,
                },
            )?;
            report(&event, json)?;

            if config.oracle.auto_fulfill {
                let randomness = oracle.fulfill(&ledger, &request_id)?;
                println!("🎲 Fulfilled {} (value {})", request_id, randomness.value());
            }
        }
        Commands::Fulfill { request } => match request {
            Some(hex_id) => {
                let request_id = RequestId::from_hex(&hex_id)?;
                let randomness = oracle.fulfill(&ledger, &request_id)?;
                println!("🎲 Fulfilled {} (value {})", request_id, randomness.value());
            }
            None => {
                let count = oracle.fulfill_pending(&ledger)?;
                println!("🎲 Fulfilled {} pending request(s)", count);
            }
        },
        Commands::Claim { user } => {
            let event = engine.execute(&Address::from_name(&user), Instruction::ClaimBet)?;
            report(&event, json)?;
        }
        Commands::Refund { user } => {
            let event = engine.execute(&Address::from_name(&user), Instruction::RefundExpiredBet)?;
            report(&event, json)?;
        }
        Commands::Status { user } => print_status(&engine, user.as_deref())?,
        Commands::InitConfig { .. } | Commands::Simulate { .. } => {}
    }

    Ok(())
}

fn report(event: &EngineEvent, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(event)?);
    } else {
        print_event(event);
    }
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Initialized {
            authority,
            fee_bps,
            max_bet,
        } => {
            println!("✅ Initialized");
            println!("   Authority: {}", authority);
            println!("   Fee: {} bps, max bet: {}", fee_bps, max_bet);
        }
        EngineEvent::Deposited {
            amount,
            vault_balance,
        } => println!("🏦 Deposited {} (vault: {})", amount, vault_balance),
        EngineEvent::Withdrawn {
            amount,
            vault_balance,
        } => println!("🏦 Withdrew {} (vault: {})", amount, vault_balance),
        EngineEvent::FeeUpdated { previous, fee_bps } => {
            println!("⚙️  Fee {} -> {} bps", previous, fee_bps)
        }
        EngineEvent::MaxBetUpdated { previous, max_bet } => {
            println!("⚙️  Max bet {} -> {}", previous, max_bet)
        }
        EngineEvent::AuthorityTransferred {
            previous,
            authority,
        } => println!("🔑 Authority {} -> {}", previous, authority),
        EngineEvent::BetPlaced(receipt) => {
            println!("🪙 Bet placed");
            println!("   Request: {}", receipt.request_id);
            println!("   Guess: {}, amount: {}", receipt.guess, receipt.amount);
            println!("   Potential payout: {}", receipt.potential_payout);
            println!("   Oracle fee (paid by vault): {}", receipt.oracle_fee);
        }
        EngineEvent::BetSettled { result, .. } => {
            if result.won {
                println!("🎉 {} - you won {}", result.outcome, result.payout);
            } else {
                println!("💀 {} - you lost {}", result.outcome, result.amount);
            }
            println!("   Randomness value: {}", result.randomness_value);
        }
        EngineEvent::BetRefunded(receipt) => {
            println!("↩️  Refunded {} for {}", receipt.amount, receipt.request_id)
        }
    }
}

fn print_status(engine: &CoinFlipEngine, user: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Coinflip Status");
    println!("==================");

    match engine.global_config()? {
        Some(config) => {
            println!("Authority: {}", config.authority);
            println!("Fee: {} bps", config.fee_bps);
            println!("Max bet: {}", config.max_bet);

            let snapshot = engine.check_conservation()?;
            println!("Vault balance: {}", snapshot.balance);
            println!("Free liquidity: {}", snapshot.free_liquidity());
            println!("Outstanding liabilities: {}", snapshot.state.outstanding_liabilities);
            println!("Oracle fees paid: {}", snapshot.state.total_oracle_fees);
            println!(
                "Bets placed/settled: {}/{}",
                snapshot.state.bets_placed, snapshot.state.bets_settled
            );
            println!("✓ Vault accounting balanced");
        }
        None => println!("⚠️  Not initialized (run `coinflip init`)"),
    }

    if let Some(name) = user {
        let address = Address::from_name(name);
        println!();
        println!("👤 {} ({})", name, address);
        println!("   Balance: {}", engine.balance_of(&address)?);
        match engine.bet_record(&address)? {
            Some(record) => print_record(&record),
            None => println!("   No bets yet"),
        }
    }

    Ok(())
}

fn print_record(record: &UserBetRecord) {
    println!("   Status: {:?}", record.status());
    println!("   Bets placed: {}", record.bets_placed);
    if let Some(bet) = record.pending() {
        println!("   Pending: {} on {} (request {})", bet.amount, bet.guess, bet.request_id);
    }
    if let Some(last) = &record.last_outcome {
        println!(
            "   Last: guessed {}, got {}, {}",
            last.guess,
            last.outcome,
            if last.won { "won" } else { "lost" }
        );
    }
}

#[derive(Default)]
struct BettorStats {
    bets: u64,
    wins: u64,
    wagered: u64,
    paid_out: u64,
}

/// Current unix time as a request nonce
fn default_nonce(now: i64) -> Result<u32, String> {
    u32::try_from(now).map_err(|_| format!("time {} does not fit a nonce, pass --nonce", now))
}

fn run_bettor(
    engine: &CoinFlipEngine,
    oracle: &VrfOracle,
    index: usize,
    rounds: u32,
    wager: u64,
    seed: Option<u64>,
) -> EngineResult<BettorStats> {
    let bettor = Address::from_name(&format!("bettor-{}", index));
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    engine
        .ledger()
        .airdrop(&bettor, wager.saturating_mul(rounds as u64))?;

    let mut stats = BettorStats::default();
    for round in 0..rounds {
        let request_id = RequestId::derive(round, &bettor);
        let placed = engine.execute(
            &bettor,
            Instruction::PlaceBet {
                request_id,
                guess: rng.gen_range(0..=1),
                amount: rng.gen_range(1..=wager),
            },
        );
        if let Err(e) = placed {
            // The vault can run dry while other bettors hold liabilities
            warn!(bettor = %bettor, error = %e, "bet skipped");
            continue;
        }

        oracle.fulfill(engine.ledger(), &request_id)?;
        if let EngineEvent::BetSettled { result, .. } =
            engine.execute(&bettor, Instruction::ClaimBet)?
        {
            stats.bets += 1;
            stats.wagered += result.amount;
            stats.paid_out += result.payout;
            if result.won {
                stats.wins += 1;
            }
        }
    }
    Ok(stats)
}

async fn run_simulation(
    bettors: usize,
    rounds: u32,
    wager: u64,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = CoinFlipConfig::simulation();
    let wager = wager.max(1);
    let ledger = Arc::new(Ledger::open(&config.storage)?);
    let engine = CoinFlipEngine::from_config(ledger.clone(), &config);
    let oracle = VrfOracle::from_seed_phrase(&config.oracle.signing_seed)?;

    println!("🚀 Coinflip simulation: {} bettors x {} rounds", bettors, rounds);

    let admin = Address::from_name("admin");
    let treasury = Address::from_name(&config.oracle.treasury_label);
    oracle.bootstrap(&ledger, treasury, config.oracle.request_fee)?;

    let bankroll = wager.saturating_mul(bettors as u64).saturating_mul(4);
    ledger.airdrop(&admin, bankroll)?;
    engine.execute(
        &admin,
        Instruction::Initialize {
            fee_bps: config.engine.default_fee_bps,
            max_bet: wager,
        },
    )?;
    engine.execute(&admin, Instruction::DepositSol { amount: bankroll })?;

    let mut events = engine.subscribe();
    let listener = tokio::spawn(async move {
        let mut observed = 0u64;
        loop {
            match events.recv().await {
                Ok(_) => observed += 1,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged");
                    observed += skipped;
                }
                Err(RecvError::Closed) => break,
            }
        }
        observed
    });

    let start = Instant::now();
    let results = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..bettors)
            .map(|index| {
                let engine = &engine;
                let oracle = &oracle;
                let rng_seed = seed.map(|base| base.wrapping_add(index as u64));
                s.spawn(move |_| run_bettor(engine, oracle, index, rounds, wager, rng_seed))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    })
    .map_err(|_| "bettor thread pool panicked")?;

    let mut total = BettorStats::default();
    for result in results {
        let stats = result.map_err(|_| "bettor thread panicked")??;
        total.bets += stats.bets;
        total.wins += stats.wins;
        total.wagered += stats.wagered;
        total.paid_out += stats.paid_out;
    }
    let elapsed = start.elapsed();

    let snapshot = engine.check_conservation()?;
    drop(engine);
    let observed = listener.await?;

    info!(bets = total.bets, wins = total.wins, "simulation finished");
    println!("📊 Results");
    println!("   Bets settled: {}", total.bets);
    println!(
        "   Wins: {} ({:.1}%)",
        total.wins,
        if total.bets == 0 {
            0.0
        } else {
            total.wins as f64 * 100.0 / total.bets as f64
        }
    );
    println!("   Wagered: {}, paid out: {}", total.wagered, total.paid_out);
    println!("   Vault: {} -> {}", bankroll, snapshot.balance);
    println!("   Oracle fees paid by vault: {}", snapshot.state.total_oracle_fees);
    println!("   Events observed: {}", observed);
    println!("   Elapsed: {:.2?}", elapsed);
    println!("✓ Vault accounting balanced");

    Ok(())
}
