use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use forester_core::{
    CheckoutOptions, CommitOptions, Error, LockType, Oid, Repo, RepoConfig,
};

#[derive(Parser)]
#[command(name = "forester", version, about = "Content-addressed version control for 3D assets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a repository
    Init {
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Create a commit from the working set
    Commit {
        #[arg(short, long)]
        message: String,
        #[arg(short, long)]
        author: Option<String>,
        #[arg(long)]
        no_verify: bool,
        /// Snapshot only mesh descriptors (quick intermediate save)
        #[arg(long)]
        meshes: bool,
    },
    /// Show one commit
    Show {
        hash: String,
        #[arg(long)]
        full: bool,
    },
    /// List commits on a branch, newest first
    Log {
        branch: Option<String>,
        #[arg(short, long)]
        verbose: bool,
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Branch management
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },
    /// Restore the working directory from a branch, tag, or commit
    Checkout {
        target: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        no_verify: bool,
        /// Materialize only paths matching these globs
        #[arg(long = "path")]
        paths: Vec<String>,
        /// Materialize only meshes with these object names
        #[arg(long = "mesh")]
        meshes: Vec<String>,
    },
    /// Stash management
    Stash {
        #[command(subcommand)]
        command: StashCommands,
    },
    /// Tag management
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Compare the working set against the branch tip
    Status,
    /// Lock files on the current branch
    Lock {
        paths: Vec<String>,
        #[arg(long)]
        shared: bool,
        #[arg(long)]
        user: Option<String>,
        /// Lock lifetime in seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Release file locks
    Unlock {
        paths: Vec<String>,
        #[arg(long)]
        user: Option<String>,
    },
    /// List active locks
    Locks,
    /// Rebuild the metadata index from the object store
    Rebuild {
        #[arg(long)]
        no_backup: bool,
    },
    /// Delete unreachable objects
    Gc {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum BranchCommands {
    List,
    Create {
        name: String,
        #[arg(long)]
        from: Option<String>,
    },
    Switch {
        name: String,
    },
    Rename {
        old: String,
        new: String,
    },
    Delete {
        name: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum StashCommands {
    Create {
        #[arg(short, long)]
        message: Option<String>,
    },
    List,
    Apply {
        hash: String,
        #[arg(long)]
        force: bool,
    },
    Delete {
        hash: String,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    Create {
        name: String,
        hash: Option<String>,
    },
    List,
    Show {
        name: String,
    },
    Delete {
        name: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code: u8 = match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &Error) -> u8 {
    match err {
        Error::LockedFiles(_) => 4,
        Error::HookRejected { .. } | Error::Timeout(_) => 3,
        _ => 2,
    }
}

fn run(cli: Cli) -> forester_core::Result<()> {
    let config = RepoConfig {
        author: default_author(),
        ..RepoConfig::default()
    };

    match cli.command {
        Commands::Init { path, force } => {
            let target = path.unwrap_or_else(|| PathBuf::from("."));
            let repo = Repo::init(&target, force)?;
            println!("initialized repository at {}", repo.repo_dir().display());
        }
        Commands::Commit {
            message,
            author,
            no_verify,
            meshes,
        } => {
            let repo = Repo::find(".")?;
            let author = author.unwrap_or_else(|| config.author.clone());
            let opts = CommitOptions {
                no_verify,
                mesh_only: meshes,
                ..CommitOptions::default()
            };
            match forester_core::commit(&repo, &config, &message, &author, &opts)? {
                Some(hash) => println!("{hash}"),
                None => println!("no changes"),
            }
        }
        Commands::Show { hash, full } => {
            let repo = Repo::find(".")?;
            let detail = forester_core::show(&repo, &hash)?;
            print_commit(&detail.row);
            if !detail.mesh_names.is_empty() {
                println!("meshes: {}", detail.mesh_names.join(", "));
            }
            if full {
                for file in &detail.files {
                    println!("{} {:>8} {}", file.blob_hash, file.size, file.path);
                }
            }
        }
        Commands::Log {
            branch,
            verbose,
            count,
        } => {
            let repo = Repo::find(".")?;
            for row in forester_core::log(&repo, branch.as_deref(), count)? {
                if verbose {
                    print_commit(&row);
                    println!();
                } else {
                    println!("* {} {}", row.hash, row.message);
                }
            }
        }
        Commands::Branch { command } => run_branch(command)?,
        Commands::Checkout {
            target,
            force,
            no_verify,
            paths,
            meshes,
        } => {
            let repo = Repo::find(".")?;
            let opts = CheckoutOptions {
                force,
                no_verify,
                file_patterns: if paths.is_empty() { None } else { Some(paths) },
                mesh_names: if meshes.is_empty() { None } else { Some(meshes) },
            };
            forester_core::checkout(&repo, &config, &target, &opts)?;
            println!("checked out {target}");
        }
        Commands::Stash { command } => run_stash(command, &config)?,
        Commands::Tag { command } => run_tag(command)?,
        Commands::Status => {
            let repo = Repo::find(".")?;
            let report = forester_core::status(&repo)?;
            match report.head {
                Some(head) => println!("on branch {} at {}", report.branch, head),
                None => println!("on branch {} (no commits)", report.branch),
            }
            if report.is_clean() {
                println!("working directory clean");
            } else {
                for path in &report.added {
                    println!("added:    {path}");
                }
                for path in &report.modified {
                    println!("modified: {path}");
                }
                for path in &report.deleted {
                    println!("deleted:  {path}");
                }
            }
        }
        Commands::Lock {
            paths,
            shared,
            user,
            ttl,
        } => {
            let repo = Repo::find(".")?;
            let mut index = forester_core::Index::open(&repo)?;
            let branch = index.current_branch()?;
            let user = user.unwrap_or_else(|| config.author.clone());
            let lock_type = if shared {
                LockType::Shared
            } else {
                LockType::Exclusive
            };
            let mut denied = Vec::new();
            for (path, ok) in
                forester_core::lock_files(&mut index, &paths, &branch, &user, lock_type, ttl)?
            {
                println!("{}: {}", path, if ok { "locked" } else { "denied" });
                if !ok {
                    denied.push(path);
                }
            }
            if !denied.is_empty() {
                return Err(Error::LockedFiles(denied));
            }
        }
        Commands::Unlock { paths, user } => {
            let repo = Repo::find(".")?;
            let mut index = forester_core::Index::open(&repo)?;
            let branch = index.current_branch()?;
            let user = user.unwrap_or_else(|| config.author.clone());
            for (path, ok) in forester_core::unlock_files(&mut index, &paths, &branch, &user)? {
                println!("{}: {}", path, if ok { "unlocked" } else { "not held" });
            }
        }
        Commands::Locks => {
            let repo = Repo::find(".")?;
            let index = forester_core::Index::open(&repo)?;
            for lock in forester_core::get_locks(&index, None, None)? {
                let expiry = lock
                    .expires_at
                    .map(|at| format!(" expires {at}"))
                    .unwrap_or_default();
                println!(
                    "{} [{}] {} by {}{}",
                    lock.file_path,
                    lock.branch,
                    lock.lock_type.as_str(),
                    lock.locked_by,
                    expiry
                );
            }
        }
        Commands::Rebuild { no_backup } => {
            let repo = Repo::find(".")?;
            let stats = forester_core::rebuild(&repo, !no_backup)?;
            println!(
                "rebuilt: {} commits, {} trees, {} meshes, {} textures, {} stashes, {} branches",
                stats.commits,
                stats.trees,
                stats.meshes,
                stats.textures,
                stats.stashes,
                stats.branches
            );
        }
        Commands::Gc { dry_run } => {
            let repo = Repo::find(".")?;
            let stats = forester_core::gc(&repo, dry_run)?;
            let verb = if dry_run { "would delete" } else { "deleted" };
            println!("{verb} {} commits", stats.commits_deleted);
            println!("{verb} {} trees", stats.trees_deleted);
            println!("{verb} {} blobs", stats.blobs_deleted);
            println!("{verb} {} meshes", stats.meshes_deleted);
            println!("{verb} {} textures", stats.textures_deleted);
        }
    }
    Ok(())
}

fn run_branch(command: BranchCommands) -> forester_core::Result<()> {
    let repo = Repo::find(".")?;
    match command {
        BranchCommands::List => {
            for info in forester_core::list_branches(&repo)? {
                let marker = if info.current { "*" } else { " " };
                let tip = info
                    .tip
                    .map(|tip| tip.to_hex()[..12].to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{marker} {} {} ({} commits)", info.name, tip, info.commit_count);
            }
        }
        BranchCommands::Create { name, from } => {
            forester_core::create_branch(&repo, &name, from.as_deref())?;
            println!("created branch {name}");
        }
        BranchCommands::Switch { name } => {
            forester_core::switch_branch(&repo, &name)?;
            println!("switched to {name}");
        }
        BranchCommands::Rename { old, new } => {
            forester_core::rename_branch(&repo, &old, &new)?;
            println!("renamed {old} to {new}");
        }
        BranchCommands::Delete { name, force } => {
            forester_core::delete_branch(&repo, &name, force)?;
            println!("deleted branch {name}");
        }
    }
    Ok(())
}

fn run_stash(command: StashCommands, config: &RepoConfig) -> forester_core::Result<()> {
    let repo = Repo::find(".")?;
    match command {
        StashCommands::Create { message } => {
            match forester_core::stash_changes(&repo, config, message.as_deref())? {
                Some(hash) => println!("{hash}"),
                None => println!("no changes to stash"),
            }
        }
        StashCommands::List => {
            for row in forester_core::list_stashes(&repo)? {
                println!("{} [{}] {}", row.hash, row.branch, row.message);
            }
        }
        StashCommands::Apply { hash, force } => {
            let hash = resolve_stash(&repo, &hash)?;
            forester_core::apply_stash(&repo, &hash, force)?;
            println!("applied {hash}");
        }
        StashCommands::Delete { hash } => {
            let hash = resolve_stash(&repo, &hash)?;
            forester_core::delete_stash(&repo, &hash)?;
            println!("deleted {hash}");
        }
    }
    Ok(())
}

fn run_tag(command: TagCommands) -> forester_core::Result<()> {
    let repo = Repo::find(".")?;
    match command {
        TagCommands::Create { name, hash } => {
            forester_core::create_tag(&repo, &name, hash.as_deref())?;
            println!("created tag {name}");
        }
        TagCommands::List => {
            for (name, target) in forester_core::list_tags(&repo)? {
                println!("{} {}", target, name);
            }
        }
        TagCommands::Show { name } => {
            let row = forester_core::show_tag(&repo, &name)?;
            println!("tag {name}");
            print_commit(&row);
        }
        TagCommands::Delete { name } => {
            forester_core::delete_tag(&repo, &name)?;
            println!("deleted tag {name}");
        }
    }
    Ok(())
}

fn print_commit(row: &forester_core::CommitRow) {
    println!("commit {}", row.hash);
    println!("branch: {}", row.branch);
    println!("author: {}", row.author);
    println!("date:   {}", format_timestamp(row.timestamp));
    println!("type:   {}", row.commit_type.as_str());
    println!("    {}", row.message);
}

fn format_timestamp(timestamp: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp(timestamp)
        .map(|t| t.to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Accept full or unambiguous abbreviated stash hashes.
fn resolve_stash(repo: &Repo, input: &str) -> forester_core::Result<Oid> {
    if let Some(oid) = Oid::from_hex(input) {
        return Ok(oid);
    }
    let matches: Vec<Oid> = forester_core::list_stashes(repo)?
        .into_iter()
        .map(|row| row.hash)
        .filter(|hash| hash.to_hex().starts_with(input))
        .collect();
    match matches.as_slice() {
        [one] => Ok(*one),
        [] => Err(Error::UnknownRef(input.to_string())),
        _ => Err(Error::UnknownRef(format!("ambiguous prefix '{input}'"))),
    }
}

fn default_author() -> String {
    env::var("FORESTER_AUTHOR")
        .ok()
        .or_else(|| env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
