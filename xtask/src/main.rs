//! somcli xtask - build automation
//!
//! ```bash
//! cargo xtask build [--release]
//! cargo xtask test
//! cargo xtask lint
//! cargo xtask fmt [--check]
//! cargo xtask release [--target x86_64-unknown-linux-musl]
//! cargo xtask ci
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for somcli")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the somcli binary
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run all tests
    Test {
        /// Run tests in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run lints (clippy and rustfmt check)
    Lint,
    /// Format code
    Fmt {
        /// Check formatting without making changes
        #[arg(long)]
        check: bool,
    },
    /// Clean build artifacts
    Clean,
    /// Install somcli into ~/.cargo/bin
    Install,
    /// Build a release binary with version metadata and package it
    Release {
        /// Rust target triple
        #[arg(long)]
        target: Option<String>,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run CI checks (fmt, lint, test, release build)
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(project_root()?);

    match cli.command {
        Commands::Build { release } => build(&sh, release)?,
        Commands::Test { release } => test(&sh, release)?,
        Commands::Lint => lint(&sh)?,
        Commands::Fmt { check } => fmt(&sh, check)?,
        Commands::Clean => clean(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Release { target } => release(&sh, target.as_deref())?,
        Commands::Doc { open } => doc(&sh, open)?,
        Commands::Ci => ci(&sh)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)?;
    let manifest = PathBuf::from(path.trim());

    manifest
        .parent()
        .map(|p| p.to_path_buf())
        .context("Failed to find project root")
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    println!("🔨 Building somcli...");

    if release {
        cmd!(sh, "cargo build --release --bin somcli").run()?;
    } else {
        cmd!(sh, "cargo build --bin somcli").run()?;
    }

    println!("✅ Build complete!");
    Ok(())
}

fn test(sh: &Shell, release: bool) -> Result<()> {
    println!("🧪 Running tests...");

    if release {
        cmd!(sh, "cargo test --release -p somcli").run()?;
    } else {
        cmd!(sh, "cargo test -p somcli").run()?;
    }

    println!("✅ All tests passed!");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 Running lints...");

    println!("  Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;

    println!("  Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;

    println!("✅ All lints passed!");
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    println!("🎨 Formatting code...");

    if check {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    } else {
        cmd!(sh, "cargo fmt --all").run()?;
    }

    println!("✅ Formatting complete!");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ Clean complete!");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📥 Installing somcli locally...");
    cmd!(sh, "cargo install --path .").run()?;
    println!("✅ Installation complete!");
    Ok(())
}

/// Values baked into `somcli version` through `option_env!`
fn build_metadata(sh: &Shell) -> (String, String) {
    let commit = cmd!(sh, "git rev-parse --short HEAD")
        .quiet()
        .read()
        .unwrap_or_else(|_| "unknown".to_string());
    let date = cmd!(sh, "date -u +%Y-%m-%dT%H:%M:%SZ")
        .quiet()
        .read()
        .unwrap_or_else(|_| "unknown".to_string());
    (commit, date)
}

fn release(sh: &Shell, target: Option<&str>) -> Result<()> {
    println!("🚀 Building release artifacts...");

    let (commit, date) = build_metadata(sh);
    let target_args: Vec<String> = match target {
        Some(t) => vec!["--target".to_string(), t.to_string()],
        None => Vec::new(),
    };
    cmd!(sh, "cargo build --release --bin somcli {target_args...}")
        .env("SOMCLI_GIT_COMMIT", &commit)
        .env("SOMCLI_BUILD_DATE", &date)
        .run()?;

    let binary = match target {
        Some(t) => PathBuf::from(format!("target/{}/release/somcli", t)),
        None => PathBuf::from("target/release/somcli"),
    };
    let release_dir = Path::new("target/release-artifacts");
    if release_dir.exists() {
        std::fs::remove_dir_all(release_dir)?;
    }
    std::fs::create_dir_all(release_dir)?;
    std::fs::copy(&binary, release_dir.join("somcli"))
        .with_context(|| format!("missing binary {}", binary.display()))?;

    let archive = format!("somcli-{}.tar.gz", target.unwrap_or("native"));
    sh.change_dir(release_dir);
    cmd!(sh, "tar -czf {archive} somcli").run()?;
    sh.change_dir("../..");

    println!("✅ Release artifacts ready in target/release-artifacts/ ({})", commit);
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    println!("📚 Generating documentation...");

    if open {
        cmd!(sh, "cargo doc --no-deps --open").run()?;
    } else {
        cmd!(sh, "cargo doc --no-deps").run()?;
    }

    println!("✅ Documentation generated!");
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    println!("🔄 Running CI checks...");

    println!("\n📋 Step 1/4: Format check");
    fmt(sh, true)?;

    println!("\n📋 Step 2/4: Lint");
    lint(sh)?;

    println!("\n📋 Step 3/4: Tests");
    test(sh, false)?;

    println!("\n📋 Step 4/4: Release build");
    build(sh, true)?;

    println!("\n✅ All CI checks passed!");
    Ok(())
}
