use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
mod auth;
use pii_vault::{
    ActiveProfileEncryptor, EncryptionConfig, EncryptionContext, PersonalKeyGenerator, Pii,
    ProfileEncryptor, Storage, Vault, default_storage,
};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn resolve_storage(path: Option<PathBuf>) -> Result<Storage> {
    match path {
        Some(p) => Ok(Storage::new(p)),
        None => default_storage(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pii_vault=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[derive(Debug, Parser)]
#[command(name = "pii-vault")]
#[command(
    version,
    about = "Development tool for envelope-encrypted PII records."
)]
struct Cli {
    /// Path to the vault record file
    #[arg(long, global = true, value_name = "PATH", env = "PII_VAULT_PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates a user record and encrypts PII onto its profile
    Init {
        /// JSON file with the PII attributes
        #[arg(long, value_name = "PATH")]
        pii_file: PathBuf,

        /// Email address stored as an encrypted attribute
        #[arg(long)]
        email: Option<String>,
    },

    /// Decrypts and prints the profile PII
    Show {
        /// Use the personal key instead of the password
        #[arg(long, default_value_t = false)]
        personal_key: bool,
    },

    /// Checks the password
    VerifyPassword,

    /// Checks a personal key
    VerifyPersonalKey,

    /// Replaces the password, keeping the PII readable
    ChangePassword,

    /// Issues a new personal key
    RegeneratePersonalKey,

    /// Sets a new password using the personal key
    ResetPassword,

    /// Shows information about the record
    Info,
}

fn print_personal_key(key: &pii_vault::PersonalKey) {
    println!("personal key: {key}");
    println!("store it somewhere safe; it will not be shown again");
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Cli::parse();
    let config = EncryptionConfig::from_env().context("invalid encryption configuration")?;
    let ctx = EncryptionContext::from_config(config)?;
    debug!(strategy = %ctx.key_maker().strategy(), "encryption context ready");

    let storage = resolve_storage(args.store)?;

    match args.command {
        Commands::Init { pii_file, email } => {
            let raw = std::fs::read(&pii_file)
                .with_context(|| format!("failed to read {}", pii_file.display()))?;
            let pii: Pii = serde_json::from_slice(&raw).context("PII file is not valid JSON")?;
            let password = auth::read_password()?;

            let (_, key) =
                Vault::init_with_storage(&ctx, storage, &password, email.as_deref(), &pii)?;
            println!("vault initialized");
            print_personal_key(&key);
        }
        Commands::Show { personal_key } => {
            let vault = Vault::open_with_storage(storage)?;
            let encryptor = ProfileEncryptor::new(&ctx);
            let pii = if personal_key {
                let key = auth::read_personal_key()?;
                encryptor.recover_pii(vault.profile(), &key)?
            } else {
                let password = auth::read_password()?;
                encryptor.decrypt_pii(vault.profile(), &password)?
            };

            if let Some(email) = vault.email(&ctx)? {
                println!("email: {}", email.decrypted());
            }
            println!("{}", serde_json::to_string_pretty(&pii)?);
        }
        Commands::VerifyPassword => {
            let vault = Vault::open_with_storage(storage)?;
            let password = auth::read_password()?;
            vault.user().verify_password(&ctx, &password)?.into_verified()?;
            println!("password verified");
        }
        Commands::VerifyPersonalKey => {
            let vault = Vault::open_with_storage(storage)?;
            let key = auth::read_personal_key()?;
            PersonalKeyGenerator::new(&ctx)
                .verify(vault.user(), &key)?
                .into_verified()?;
            println!("personal key verified");
        }
        Commands::ChangePassword => {
            let mut vault = Vault::open_with_storage(storage)?;
            let old = auth::read_password()?;
            let new = auth::read_new_password_with_confirmation()?;

            let (profile, user) = vault.parts_mut();
            ActiveProfileEncryptor::new(&ctx).change_password(profile, user, &old, &new)?;
            vault.save()?;
            println!("password changed");
        }
        Commands::RegeneratePersonalKey => {
            let mut vault = Vault::open_with_storage(storage)?;
            let password = auth::read_password()?;

            let (profile, user) = vault.parts_mut();
            let key =
                ProfileEncryptor::new(&ctx).regenerate_personal_key(profile, user, &password)?;
            vault.save()?;
            print_personal_key(&key);
        }
        Commands::ResetPassword => {
            let mut vault = Vault::open_with_storage(storage)?;
            let old_key = auth::read_personal_key()?;
            let new = auth::read_new_password_with_confirmation()?;

            let (profile, user) = vault.parts_mut();
            let key = ProfileEncryptor::new(&ctx)
                .reset_password_with_personal_key(profile, user, &old_key, &new)?;
            vault.save()?;
            println!("password reset");
            print_personal_key(&key);
        }
        Commands::Info => {
            let vault = Vault::open_with_storage(storage)?;
            println!("{}", vault.info(&ctx));
        }
    }

    Ok(())
}
