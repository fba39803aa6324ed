//! Cartgate CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations (tables and session store)
//! cartgate-cli migrate
//!
//! # Create a user
//! cartgate-cli user create -e admin@example.com -r super_admin -p 'correct horse battery'
//!
//! # Issue a session token for API testing
//! cartgate-cli token issue -u 42 -r customer
//!
//! # Delete guest carts untouched for 30 days
//! cartgate-cli carts purge --older-than-days 30
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "cartgate-cli")]
#[command(author, version, about = "Cartgate CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Session tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Cart maintenance
    Carts {
        #[command(subcommand)]
        action: CartsAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user with a password
    Create {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// Role (`super_admin`, `admin`, `viewer`, `customer`)
        #[arg(short, long, default_value = "customer")]
        role: String,

        /// Initial password
        #[arg(short, long)]
        password: String,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a token signed with `STOREFRONT_TOKEN_SECRET`
    Issue {
        /// User ID the token is for
        #[arg(short, long)]
        user_id: i32,

        /// Role carried by the token
        #[arg(short, long)]
        role: String,
    },
}

#[derive(Subcommand)]
enum CartsAction {
    /// Delete guest carts not modified within the given number of days
    Purge {
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::User { action } => match action {
            UserAction::Create {
                email,
                role,
                password,
            } => {
                commands::user::create_user(&email, &role, &password).await?;
            }
        },
        Commands::Token { action } => match action {
            TokenAction::Issue { user_id, role } => commands::token::issue(user_id, &role)?,
        },
        Commands::Carts { action } => match action {
            CartsAction::Purge { older_than_days } => {
                commands::carts::purge(older_than_days).await?;
            }
        },
    }
    Ok(())
}
