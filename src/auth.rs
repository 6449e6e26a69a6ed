use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "PII_VAULT_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "PII_VAULT_NEW_PASSWORD";
pub const PERSONAL_KEY_ENV: &str = "PII_VAULT_PERSONAL_KEY";

/// Read a secret from `env`, then a line of piped stdin, then a TTY prompt.
fn read_secret(env: &str, prompt: &str, what: &str) -> Result<Zeroizing<String>> {
    //  PII_VAULT_PASSWORD="supersecret" pii-vault show
    if let Ok(secret) = std::env::var(env) {
        if !secret.is_empty() {
            return Ok(Zeroizing::new(secret));
        }
    }

    //  printf "%s\n" "$PASSWORD" | pii-vault show
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().lock().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return Ok(buf);
        }
    } else {
        let secret = Zeroizing::new(rpassword::prompt_password(prompt)?);
        if !secret.is_empty() {
            return Ok(secret);
        }
    }

    bail!("no {what} provided")
}

pub fn read_password() -> Result<Zeroizing<String>> {
    read_secret(PASSWORD_ENV, "Password: ", "password")
}

pub fn read_personal_key() -> Result<Zeroizing<String>> {
    read_secret(PERSONAL_KEY_ENV, "Personal key: ", "personal key")
}

/// New password from the environment, or typed twice.
pub fn read_new_password_with_confirmation() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(NEW_PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    if !io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut handle = stdin.lock();

        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());

        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;

        trim_newline(&mut pw1);
        trim_newline(&mut pw2);

        return confirm(pw1, pw2);
    }

    let pw1 = Zeroizing::new(rpassword::prompt_password("New password: ")?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);

    confirm(pw1, pw2)
}

fn confirm(pw1: Zeroizing<String>, pw2: Zeroizing<String>) -> Result<Zeroizing<String>> {
    if pw1.is_empty() {
        bail!("password cannot be empty");
    }

    if pw1 != pw2 {
        bail!("passwords do not match");
    }

    Ok(pw1)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
