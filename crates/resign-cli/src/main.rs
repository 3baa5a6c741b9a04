//! Command-line interface for the resign IPA re-signing tool.
//!
//! Lists installed provisioning profiles and signing identities, and
//! re-signs IPA archives with a chosen profile and identity.

use clap::{ArgGroup, Parser, Subcommand};
use resign::codesign::TrustAnchorInstaller;
use resign::{toolchain, ProvisioningProfile, Resign, SystemRunner};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "resign")]
#[command(about = "Re-sign iOS IPA archives with a provisioning profile and signing identity")]
#[command(version)]
struct Cli {
    /// Answer yes to every confirmation prompt
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Directory holding installed provisioning profiles
    #[arg(long, global = true, env = "RESIGN_PROFILE_DIR")]
    profile_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-sign an IPA archive
    #[command(group(
        ArgGroup::new("profile_source")
            .required(true)
            .args(["profile", "profile_path"])
    ))]
    Sign {
        /// Input IPA
        #[arg(short, long)]
        input: PathBuf,

        /// Output IPA
        #[arg(short, long)]
        output: PathBuf,

        /// Signing identity, as printed by `resign list-identities`
        #[arg(short = 'c', long, env = "RESIGN_IDENTITY")]
        identity: String,

        /// Installed provisioning profile, as printed by `resign list-profiles`
        #[arg(short = 'p', long, env = "RESIGN_PROFILE")]
        profile: Option<String>,

        /// Provisioning profile file
        #[arg(short = 'P', long)]
        profile_path: Option<PathBuf>,

        /// Entitlements plist to use instead of the profile's entitlements
        #[arg(short, long)]
        entitlements: Option<PathBuf>,

        /// Remove get-task-allow from the entitlements
        #[arg(long)]
        strip_get_task_allow: bool,

        /// Point a wildcard profile's application-identifier at the app's bundle id
        #[arg(long)]
        rebind_wildcard_app_id: bool,

        /// ZIP compression level (0-9)
        #[arg(short = 'z', long, default_value = "6")]
        compression_level: u32,

        /// Directory for temporary files
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// List installed provisioning profiles
    ListProfiles,

    /// List valid code signing identities
    ListIdentities,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> resign::Result<()> {
    if !cfg!(target_os = "macos") {
        return Err(resign::Error::MissingTool(
            "resign relies on codesign and security, which are only available on macOS".into(),
        ));
    }

    let yes = cli.yes;
    let confirm = move |question: &str| yes || ask(question);

    toolchain::ensure_command_line_tools(&SystemRunner, &confirm)?;

    let mut builder = Resign::new().remediation(Rc::new(TrustAnchorInstaller::new(confirm)));
    if let Some(dir) = &cli.profile_dir {
        builder = builder.profile_dir(dir);
    }

    match cli.command {
        Command::Sign {
            input,
            output,
            identity,
            profile,
            profile_path,
            entitlements,
            strip_get_task_allow,
            rebind_wildcard_app_id,
            compression_level,
            work_dir,
        } => {
            builder = builder
                .identity(identity)
                .compression_level(compression_level)
                .strip_get_task_allow(strip_get_task_allow)
                .rebind_wildcard_app_id(rebind_wildcard_app_id);
            if let Some(name) = profile {
                builder = builder.profile_name(name);
            }
            if let Some(path) = profile_path {
                builder = builder.profile_path(path);
            }
            if let Some(path) = entitlements {
                builder = builder.entitlements(path);
            }
            if let Some(dir) = work_dir {
                builder = builder.work_dir(dir);
            }

            builder.sign_ipa(&input, &output)?;
            println!("Signed: {}", output.display());
        }
        Command::ListProfiles => print_profiles(&builder.list_profiles()?),
        Command::ListIdentities => {
            let identities = builder.list_identities()?;
            if identities.is_empty() {
                println!("No code signing identities found.");
                builder.remediate()?;
                println!("Run this command again to list your code signing identities.");
                return Ok(());
            }

            println!(
                "Found {} code signing identit{}:",
                identities.len(),
                plural(identities.len(), "y", "ies")
            );
            for identity in &identities {
                println!("  {}", identity);
            }
        }
    }

    Ok(())
}

fn print_profiles(profiles: &[ProvisioningProfile]) {
    if profiles.is_empty() {
        println!("No provisioning profiles found");
        return;
    }

    println!(
        "Found {} provisioning profile{}:",
        profiles.len(),
        plural(profiles.len(), "", "s")
    );
    for profile in profiles {
        if profile.is_expired() {
            println!("  {} !EXPIRED!", profile.display_label());
        } else {
            println!("  {}", profile.display_label());
        }
    }
}

fn plural(count: usize, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Ask a y/n question on stdin. Anything unreadable counts as no.
fn ask(question: &str) -> bool {
    loop {
        print!("{} [y/n]: ", question);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().read_line(&mut answer) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }

        match answer.trim() {
            "y" | "Y" => return true,
            "n" | "N" => return false,
            _ => continue,
        }
    }
}
