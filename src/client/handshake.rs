//! Session initialization and credential masking

use once_cell::sync::Lazy;
use regex::Regex;

use super::config::{ConnectionConfig, Credentials};

static USER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"USER \S+").unwrap());
static SECRET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(PASSWORD|HASH|APIKEY|TOKEN) [^;]*").unwrap());

/// Batched command sent once the socket is open.
///
/// Credentials are checked non-linearizable for speed; linearizability is
/// restored afterwards unless the config keeps it off.
pub fn initialization_commands(config: &ConnectionConfig) -> String {
    let mut commands = String::from("SET CLIENT KEY NONLINEARIZABLE TO 1; ");

    match &config.credentials {
        Some(Credentials::ApiKey(key)) => {
            commands.push_str(&format!("AUTH APIKEY {}; ", key));
        }
        Some(Credentials::Token(token)) => {
            commands.push_str(&format!("AUTH TOKEN {}; ", token));
        }
        Some(Credentials::User {
            username,
            password,
            hashed,
        }) => {
            let kind = if *hashed { "HASH" } else { "PASSWORD" };
            commands.push_str(&format!("AUTH USER {} {} {}; ", username, kind, password));
        }
        None => {}
    }

    if config.compression {
        commands.push_str("SET CLIENT KEY COMPRESSION TO 1; ");
    }
    if config.zerotext {
        commands.push_str("SET CLIENT KEY ZEROTEXT TO 1; ");
    }
    if config.noblob {
        commands.push_str("SET CLIENT KEY NOBLOB TO 1; ");
    }
    if let Some(maxdata) = config.maxdata {
        commands.push_str(&format!("SET CLIENT KEY MAXDATA TO {}; ", maxdata));
    }
    if let Some(maxrows) = config.maxrows {
        commands.push_str(&format!("SET CLIENT KEY MAXROWS TO {}; ", maxrows));
    }
    if let Some(maxrowset) = config.maxrowset {
        commands.push_str(&format!("SET CLIENT KEY MAXROWSET TO {}; ", maxrowset));
    }

    if !config.non_linearizable {
        commands.push_str("SET CLIENT KEY NONLINEARIZABLE TO 0; ");
    }

    if let Some(database) = &config.database {
        if config.create && !config.memory {
            commands.push_str(&format!("CREATE DATABASE {} IF NOT EXISTS; ", database));
        }
        commands.push_str(&format!("USE DATABASE {}; ", database));
    }

    commands
}

/// Replace user names, passwords, hashes, API keys and tokens with `******`.
pub fn mask_credentials(message: &str) -> String {
    let masked = USER_RE.replace_all(message, "USER ******");
    SECRET_RE.replace_all(&masked, "$1 ******").into_owned()
}
