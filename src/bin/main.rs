use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stock_sim::engine::TradeEngine;
use stock_sim::ledger::{Ledger, TradeSide};
use stock_sim::oracle::http::HttpOracle;
use stock_sim::oracle::simulated::SimulatedOracle;
use stock_sim::oracle::PriceOracle;

#[derive(Parser, Debug)]
struct Args {
    /// Ledger snapshot file, created on first run
    #[arg(long, default_value = "ledger.json")]
    store_path: PathBuf,

    /// Quote service endpoint; defaults to the built-in simulated oracle
    #[arg(long, env = "ORACLE_URL")]
    oracle_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a user with the starting cash amount
    Register {
        username: String,
        password_hash: String,
    },
    /// Look up the current price of a symbol
    Quote { symbol: String },
    Buy {
        username: String,
        symbol: String,
        shares: u64,
    },
    Sell {
        username: String,
        symbol: String,
        shares: u64,
    },
    /// Current holdings re-priced at live quotes
    Portfolio { username: String },
    /// Past trades, newest first
    History { username: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("{}=info,stock_sim=info", env!("CARGO_CRATE_NAME")).into()
        }))
        .with(fmt::layer())
        .init();

    let Args {
        store_path,
        oracle_url,
        command,
    } = Args::parse();

    let ledger = if store_path.exists() {
        Ledger::load(&store_path).await?
    } else {
        Ledger::new()
    };

    match oracle_url {
        Some(url) => run(command, ledger.clone(), HttpOracle::new(&url)?).await?,
        None => run(command, ledger.clone(), SimulatedOracle::with_default_listing()).await?,
    }

    ledger.save(&store_path).await?;

    Ok(())
}

async fn run<O: PriceOracle>(command: Commands, ledger: Ledger, oracle: O) -> Result<()> {
    let engine = TradeEngine::new(ledger, oracle);

    match command {
        Commands::Register {
            username,
            password_hash,
        } => {
            let user = engine
                .ledger()
                .register_user(&username, &password_hash)
                .await?;
            println!(
                "registered {} with {} cash",
                user.username.green(),
                user.cash
            );
        }
        Commands::Quote { symbol } => {
            let quote = engine.quote(&symbol).await?;
            println!("{} ({}) : {}", quote.symbol, quote.name, quote.price);
        }
        Commands::Buy {
            username,
            symbol,
            shares,
        } => {
            let receipt = engine.buy(&username, &symbol, shares).await?;
            println!(
                "{} {} x{} at {} : holding {}, cash {}",
                "BUY".green(),
                receipt.symbol,
                shares,
                receipt.price,
                receipt.shares,
                receipt.cash
            );
        }
        Commands::Sell {
            username,
            symbol,
            shares,
        } => {
            let receipt = engine.sell(&username, &symbol, shares).await?;
            println!(
                "{} {} x{} at {} : holding {}, cash {}",
                "SELL".red(),
                receipt.symbol,
                shares,
                receipt.price,
                receipt.shares,
                receipt.cash
            );
        }
        Commands::Portfolio { username } => {
            let view = engine.portfolio(&username).await?;
            for position in &view.positions {
                match (position.price, position.value) {
                    (Some(price), Some(value)) => {
                        println!(
                            "{:<6} {:>8} @ {:>10} = {}",
                            position.symbol, position.shares, price, value
                        );
                    }
                    _ => println!(
                        "{:<6} {:>8}   {}",
                        position.symbol,
                        position.shares,
                        "no quote".yellow()
                    ),
                }
            }
            println!("cash  : {}", view.cash);
            println!("stocks: {}", view.total_value);
            if view.incomplete {
                println!("{}", "some holdings could not be priced".yellow());
            }
        }
        Commands::History { username } => {
            for entry in engine.ledger().history(&username).await {
                println!(
                    "{} {} {} x{} at {}",
                    entry.time.format("%Y-%m-%d %H:%M:%S"),
                    match entry.side {
                        TradeSide::Buy => "BUY ".green(),
                        TradeSide::Sell => "SELL".red(),
                    },
                    entry.symbol,
                    entry.shares,
                    entry.price
                );
            }
        }
    }

    Ok(())
}
