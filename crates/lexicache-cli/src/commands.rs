//! Command parsing and execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};

use lexicache_core::api::ApiClient;
use lexicache_core::auth::{Session, SessionData, StaticToken, TokenProvider};
use lexicache_core::cache::{FileStore, KeyValueStore, MemoryStore};
use lexicache_core::catalog::SharedCatalog;
use lexicache_core::config::Config;
use lexicache_core::models::ProgressUpdate;
use lexicache_core::store::coins::balance_key;
use lexicache_core::store::{CoinStore, ProgressStore};
use lexicache_core::StoreError;

use crate::output;

/// Overrides the configured API base URL
const API_URL_ENV: &str = "LEXICACHE_API_URL";
/// With `LEXICACHE_USER`, signs in without a stored session
const TOKEN_ENV: &str = "LEXICACHE_TOKEN";
const USER_ENV: &str = "LEXICACHE_USER";

pub const USAGE: &str = "\
Usage: lexicache <command> [options]

Commands:
  login <user>                      Sign in; the API token is read from the terminal
  logout                            Sign out and forget the stored token
  progress [--force]                Show progress for all exercises
  exercise <id> [--force]           Show one exercise and its attempts
  attempt <id> <seconds> <correct|wrong> [--completed] [--answer <text>]
                                    Record an attempt
  coins                             Show the coin balance
  coins add <amount> [reason]       Add coins
  coins deduct <amount> [reason]    Spend coins
  reward [check|claim|history]      Daily reward status, claim, or history
  status                            Show session and cache information
  help                              Show this message

Environment:
  LEXICACHE_API_URL                 API base URL
  LEXICACHE_TOKEN, LEXICACHE_USER   Use this token and user instead of the stored session
  RUST_LOG                          Log filter, e.g. debug";

#[derive(Debug, Clone, PartialEq)]
pub enum CoinsAction {
    Show,
    Add { amount: i64, reason: Option<String> },
    Deduct { amount: i64, reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardAction {
    Check,
    Claim,
    History,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { user_id: String },
    Logout,
    Progress { force: bool },
    Exercise { exercise_id: String, force: bool },
    Attempt {
        exercise_id: String,
        time_spent: f64,
        correct: bool,
        completed: bool,
        answer: Option<String>,
    },
    Coins(CoinsAction),
    Reward(RewardAction),
    Status,
    Help,
}

// ============================================================================
// Parsing
// ============================================================================

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Help);
        };
        let (flags, positional): (Vec<&String>, Vec<&String>) = split_flags(rest);

        let command = match name.as_str() {
            "help" | "--help" | "-h" => Command::Help,
            "login" => Command::Login {
                user_id: required(&positional, 0, "user")?,
            },
            "logout" => Command::Logout,
            "progress" => Command::Progress {
                force: has_flag(&flags, "--force"),
            },
            "exercise" => Command::Exercise {
                exercise_id: required(&positional, 0, "exercise id")?,
                force: has_flag(&flags, "--force"),
            },
            "attempt" => parse_attempt(rest)?,
            "coins" => Command::Coins(parse_coins(&positional)?),
            "reward" => Command::Reward(match positional.first().map(|s| s.as_str()) {
                None | Some("check") => RewardAction::Check,
                Some("claim") => RewardAction::Claim,
                Some("history") => RewardAction::History,
                Some(other) => bail!("Unknown reward action: {}", other),
            }),
            "status" => Command::Status,
            other => bail!("Unknown command: {}", other),
        };
        Ok(command)
    }
}

fn split_flags(args: &[String]) -> (Vec<&String>, Vec<&String>) {
    args.iter().partition(|a| a.starts_with("--"))
}

fn has_flag(flags: &[&String], flag: &str) -> bool {
    flags.iter().any(|f| f.as_str() == flag)
}

fn required(positional: &[&String], index: usize, name: &str) -> Result<String> {
    positional
        .get(index)
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Missing argument: <{}>", name))
}

fn parse_amount(value: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("Invalid coin amount: {}", value))
}

fn parse_attempt(args: &[String]) -> Result<Command> {
    let mut positional = Vec::new();
    let mut completed = false;
    let mut answer = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--completed" => completed = true,
            "--answer" => {
                let value = iter.next().ok_or_else(|| anyhow!("--answer needs a value"))?;
                answer = Some(value.clone());
            }
            flag if flag.starts_with("--") => bail!("Unknown option: {}", flag),
            _ => positional.push(arg),
        }
    }

    let [exercise_id, seconds, outcome] = positional.as_slice() else {
        bail!("Expected: attempt <id> <seconds> <correct|wrong>");
    };
    let time_spent: f64 = seconds
        .parse()
        .with_context(|| format!("Invalid number of seconds: {}", seconds))?;
    if !time_spent.is_finite() || time_spent < 0.0 {
        bail!("Time spent must be a non-negative number of seconds");
    }
    let correct = match outcome.as_str() {
        "correct" | "right" | "yes" => true,
        "wrong" | "incorrect" | "no" => false,
        other => bail!("Expected correct or wrong, got: {}", other),
    };

    Ok(Command::Attempt {
        exercise_id: exercise_id.to_string(),
        time_spent,
        correct,
        completed,
        answer,
    })
}

fn parse_coins(positional: &[&String]) -> Result<CoinsAction> {
    let reason = || (positional.len() > 2).then(|| join_words(&positional[2..]));
    match positional.first().map(|s| s.as_str()) {
        None => Ok(CoinsAction::Show),
        Some("add") => Ok(CoinsAction::Add {
            amount: parse_amount(&required(positional, 1, "amount")?)?,
            reason: reason(),
        }),
        Some("deduct") | Some("spend") => Ok(CoinsAction::Deduct {
            amount: parse_amount(&required(positional, 1, "amount")?)?,
            reason: reason(),
        }),
        Some(other) => bail!("Unknown coins action: {}", other),
    }
}

fn join_words(words: &[&String]) -> String {
    words.iter().map(|w| w.as_str()).collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Execution
// ============================================================================

/// Stores wired to the HTTP client, the active credentials and the cache
/// directory.
struct Stores {
    user_id: String,
    signed_in: bool,
    kv: Arc<dyn KeyValueStore>,
    progress: ProgressStore,
    coins: CoinStore,
}

impl Stores {
    fn build(config: &Config, cache_dir: &Path) -> Result<Self> {
        let settings = config.store_settings();
        let base_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| config.api_base_url().to_string());
        let client = Arc::new(ApiClient::with_timeout(&base_url, settings.request_timeout)?);
        debug!(base_url = %client.base_url(), "API client configured");

        let (user_id, tokens) = resolve_identity(config, cache_dir);
        let signed_in = tokens.token().is_some();

        let kv: Arc<dyn KeyValueStore> = match FileStore::new(cache_dir.to_path_buf()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(error = %e, "Cache directory unavailable, balance will not be kept offline");
                Arc::new(MemoryStore::new())
            }
        };
        let catalog = Arc::new(SharedCatalog::new(config.catalog));

        let progress = ProgressStore::new(client.clone(), tokens.clone(), catalog, settings);
        let coins = CoinStore::new(client, tokens, kv.clone(), settings);
        coins.load_offline_balance(&user_id);

        Ok(Self {
            user_id,
            signed_in,
            kv,
            progress,
            coins,
        })
    }
}

/// Environment credentials first, then the stored session. Without either
/// the stores run signed out and report `AuthRequired`.
fn resolve_identity(config: &Config, cache_dir: &Path) -> (String, Arc<dyn TokenProvider>) {
    if let (Ok(token), Ok(user_id)) = (std::env::var(TOKEN_ENV), std::env::var(USER_ENV)) {
        debug!(user_id = %user_id, "Using credentials from environment");
        return (user_id, Arc::new(StaticToken::new(token)));
    }

    let mut session = Session::new(cache_dir.to_path_buf());
    match session.load() {
        Ok(true) => {
            if let Some(user_id) = session.user_id().map(str::to_string) {
                if session.data.as_ref().is_some_and(SessionData::needs_refresh) {
                    warn!("Session expires soon, run `lexicache login` again");
                }
                return (user_id, Arc::new(session));
            }
        }
        Ok(false) => debug!("No valid session found"),
        Err(e) => warn!(error = %e, "Failed to load session"),
    }

    let user_id = config.last_user_id.clone().unwrap_or_default();
    (user_id, Arc::new(StaticToken::none()))
}

pub async fn run(command: Command, config: Config, cache_dir: PathBuf) -> Result<()> {
    match command {
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        Command::Login { user_id } => login(config, &cache_dir, user_id).await,
        Command::Logout => logout(config, &cache_dir),
        Command::Status => {
            let stores = Stores::build(&config, &cache_dir)?;
            output::print_status(&config, &stores.user_id, stores.signed_in, &stores.kv, &stores.progress);
            Ok(())
        }
        command => {
            let stores = Stores::build(&config, &cache_dir)?;
            if !stores.signed_in {
                eprintln!("Not signed in. Run `lexicache login <user>` first.");
            }
            run_store_command(command, &stores).await
        }
    }
}

async fn run_store_command(command: Command, stores: &Stores) -> Result<()> {
    let user = stores.user_id.as_str();
    match command {
        Command::Progress { force } => {
            let snapshot = stores.progress.read_all(user, force).await;
            output::print_progress(&snapshot, &stores.progress.aggregate());
            output::snapshot_result(&snapshot)
        }
        Command::Exercise { exercise_id, force } => {
            let snapshot = stores.progress.read_exercise(user, &exercise_id, force).await;
            output::print_exercise(&snapshot);
            output::snapshot_result(&snapshot)
        }
        Command::Attempt {
            exercise_id,
            time_spent,
            correct,
            completed,
            answer,
        } => {
            let mut update = ProgressUpdate::new(time_spent, correct, completed);
            if let Some(answer) = answer {
                update = update.with_answer(answer);
            }
            let record = stores.progress.apply_attempt(user, &exercise_id, update).await?;
            output::print_attempt_recorded(&record);
            Ok(())
        }
        Command::Coins(action) => run_coins(action, stores).await,
        Command::Reward(action) => run_reward(action, stores).await,
        Command::Help | Command::Login { .. } | Command::Logout | Command::Status => Ok(()),
    }
}

async fn run_coins(action: CoinsAction, stores: &Stores) -> Result<()> {
    let user = stores.user_id.as_str();
    match action {
        CoinsAction::Show => match stores.coins.refresh_balance(user).await {
            Ok(balance) => {
                println!("{} coins", balance);
                Ok(())
            }
            Err(e) => {
                match stores.kv.age_display(&balance_key(user)) {
                    Some(age) => println!("{} coins (offline, saved {})", stores.coins.balance(), age),
                    None => println!("Balance unavailable"),
                }
                Err(e.into())
            }
        },
        CoinsAction::Add { amount, reason } => {
            let balance = stores.coins.add_coins(user, amount, reason.as_deref()).await?;
            println!("Added {} coins. Balance: {}", amount, balance);
            Ok(())
        }
        CoinsAction::Deduct { amount, reason } => {
            // Ensure the precondition is checked against the server balance
            if let Err(e) = stores.coins.refresh_balance(user).await {
                debug!(error = %e, "Using offline balance for deduction");
            }
            match stores.coins.deduct_coins(user, amount, reason.as_deref()).await {
                Ok(balance) => {
                    println!("Spent {} coins. Balance: {}", amount, balance);
                    Ok(())
                }
                Err(StoreError::InsufficientFunds { balance, requested }) => {
                    bail!("Not enough coins: {} needed, {} available", requested, balance)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn run_reward(action: RewardAction, stores: &Stores) -> Result<()> {
    let user = stores.user_id.as_str();
    match action {
        RewardAction::Check => {
            let status = stores.coins.check_daily_reward(user).await?;
            output::print_daily_status(&status);
        }
        RewardAction::Claim => {
            let claim = stores.coins.claim_daily_reward(user).await?;
            println!(
                "Claimed {} coins. Streak: {} days. Balance: {}",
                claim.reward_amount, claim.streak, stores.coins.balance()
            );
        }
        RewardAction::History => {
            let history = stores.coins.rewards_history(user).await?;
            output::print_reward_history(&history);
        }
    }
    Ok(())
}

async fn login(mut config: Config, cache_dir: &Path, user_id: String) -> Result<()> {
    let token = rpassword::prompt_password(format!("API token for {}: ", user_id))
        .context("Failed to read token")?;
    let token = token.trim().to_string();
    if token.is_empty() {
        bail!("No token entered");
    }

    let mut session = Session::new(cache_dir.to_path_buf());
    session.update(SessionData::new(user_id.clone(), token));
    session.save().context("Failed to store credentials")?;

    config.last_user_id = Some(user_id.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    // Check the token against the server
    let stores = Stores::build(&config, cache_dir)?;
    match stores.coins.refresh_balance(&user_id).await {
        Ok(balance) => {
            info!("Login successful");
            println!("Signed in as {} ({} coins)", user_id, balance);
            Ok(())
        }
        Err(StoreError::AuthRequired) => {
            if let Err(e) = session.clear() {
                warn!(error = %e, "Failed to clear rejected session");
            }
            bail!("The server rejected the token for {}", user_id)
        }
        Err(e) => {
            println!("Signed in as {} (server not reachable: {})", user_id, e);
            Ok(())
        }
    }
}

fn logout(mut config: Config, cache_dir: &Path) -> Result<()> {
    let mut session = Session::new(cache_dir.to_path_buf());
    if let Err(e) = session.load() {
        debug!(error = %e, "No session to load before logout");
    }
    let user_id = session.user_id().map(str::to_string).or_else(|| config.last_user_id.clone());
    session.clear().context("Failed to clear session")?;

    config.last_user_id = None;
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match user_id {
        Some(user_id) => println!("Signed out {}", user_id),
        None => println!("Not signed in"),
    }
    Ok(())
}
