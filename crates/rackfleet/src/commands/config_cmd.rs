//! Config command handlers: show, init, path, set-secret.

use std::path::PathBuf;

use rackfleet_config::{
    Config, decode_secret, save_config_to, store_secret_in_keyring, write_secret_file,
};
use secrecy::{ExposeSecret, SecretString};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util::{self, prompt_err};

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = util::load_config(global)?;
            let rendered = toml::to_string_pretty(&cfg).map_err(|e| CliError::Render(e.to_string()))?;
            let out = output::render_single(
                &global.output,
                &cfg,
                |_| rendered.trim_end().to_owned(),
                |c| c.region_urls.join("\n"),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", util::config_path(global).display());
            Ok(())
        }

        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init => init(global),

        // ── SetSecret ───────────────────────────────────────────────
        ConfigCommand::SetSecret { file } => {
            let cfg = util::load_config(global)?;
            let secret = prompt_secret()?;
            if file {
                let path = cfg.secret_file();
                write_secret_file(&path, &secret)?;
                eprintln!("✓ Secret written to {}", path.display());
            } else {
                store_secret_in_keyring(&secret)?;
                eprintln!("✓ Secret stored in system keyring");
            }
            Ok(())
        }
    }
}

/// Prompt for the hex secret without echo and check that it decodes.
fn prompt_secret() -> Result<SecretString, CliError> {
    let secret = SecretString::from(rpassword::prompt_password("Shared secret (hex): ").map_err(prompt_err)?);
    if secret.expose_secret().trim().is_empty() {
        return Err(CliError::Validation {
            field: "secret".into(),
            reason: "value cannot be empty".into(),
        });
    }
    decode_secret(&secret)?;
    Ok(secret)
}

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    use dialoguer::{Input, Select};

    let config_path = util::config_path(global);
    let existing = util::load_config(global).unwrap_or_default();

    eprintln!("rackfleet configuration\n");

    // 1. Region URL
    let region_url: String = Input::new()
        .with_prompt("Region URL")
        .with_initial_text(existing.region_urls.first().cloned().unwrap_or_default())
        .validate_with(|input: &String| -> Result<(), String> {
            url::Url::parse(input).map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(prompt_err)?;

    // 2. Identity
    let hostname: String = Input::new()
        .with_prompt("Hostname")
        .default(existing.hostname())
        .interact_text()
        .map_err(prompt_err)?;

    // 3. State directory
    let state_dir: String = Input::new()
        .with_prompt("State directory")
        .default(existing.state_dir().display().to_string())
        .interact_text()
        .map_err(prompt_err)?;

    let cfg = Config {
        region_urls: vec![region_url],
        hostname: Some(hostname),
        state_dir: Some(PathBuf::from(state_dir)),
        ..existing
    };

    // 4. Shared secret
    let storage = Select::new()
        .with_prompt("Store the shared secret in")
        .items(&["System keyring", "Secret file", "Skip (use RACKFLEET_SECRET)"])
        .default(0)
        .interact()
        .map_err(prompt_err)?;
    match storage {
        0 => store_secret_in_keyring(&prompt_secret()?)?,
        1 => write_secret_file(&cfg.secret_file(), &prompt_secret()?)?,
        _ => {}
    }

    // 5. Write config
    save_config_to(&cfg, &config_path)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("\n  Start the rack: rackfleet run --interfaces <report.json>");
    Ok(())
}
