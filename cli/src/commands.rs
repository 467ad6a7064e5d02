//! Subcommand definitions and their thin dispatch into `tensorset-lib`.
//! Each arm here is a caller, not a place to put logic — business rules live
//! in the library so the CLI and any future embedder share them verbatim.

use std::path::Path;
use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use clap::Subcommand;
use tensorset_lib::ArraysetName;
use tensorset_lib::DType;
use tensorset_lib::MetadataKey;
use tensorset_lib::MergeOutcome;
use tensorset_lib::Repository;
use tensorset_lib::SampleKey;
use tensorset_lib::Schema;
use tensorset_lib::Tensor;
use tensorset_lib::sync;
use tensorset_lib::sync::local::LocalTransport;

use crate::error::CliError;
use crate::error::CliResult;

#[derive(Parser)]
#[command(name = "tensorset", about = "A version-controlled store for tensor data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new repository at `path`.
    Init {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Copy a remote repository's master branch into a fresh repository.
    Clone {
        remote: PathBuf,
        dest: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Print the arrayset/sample listing at a branch or commit.
    Checkout {
        path: PathBuf,
        #[arg(default_value = "master")]
        branch_or_commit: String,
    },
    #[command(subcommand)]
    Branch(BranchCommand),
    /// Print commit history reachable from a branch or commit, newest first.
    Log {
        path: PathBuf,
        #[arg(default_value = "master")]
        branch_or_commit: String,
    },
    /// Print arrayset/sample/metadata counts at a branch or commit.
    Summary {
        path: PathBuf,
        #[arg(default_value = "master")]
        branch_or_commit: String,
    },
    /// Fetch commit/schema/label metadata (not tensor bytes) from a remote.
    Fetch {
        path: PathBuf,
        remote: PathBuf,
        #[arg(default_value = "master")]
        branch: String,
    },
    /// Materialize tensor bytes for every sample reachable from a commit.
    FetchData {
        path: PathBuf,
        remote: PathBuf,
        #[arg(default_value = "master")]
        branch_or_commit: String,
    },
    /// Push a local branch's commits and data to a remote.
    Push {
        path: PathBuf,
        remote: PathBuf,
        #[arg(default_value = "master")]
        branch: String,
    },
    #[command(subcommand)]
    Remote(RemoteCommand),
    /// Fast-forward or three-way merge `dev` into `master`.
    Merge {
        path: PathBuf,
        master: String,
        dev: String,
        #[arg(long, default_value = "merge")]
        message: String,
    },
    #[command(subcommand)]
    Metadata(MetadataCommand),
    /// Placeholder for a networked sync endpoint; same-machine sync uses
    /// `fetch`/`push` with a remote path directly instead.
    Server {
        path: PathBuf,
        #[arg(long, default_value = "127.0.0.1:0")]
        addr: String,
    },
    /// Write a raw-bytes file into the staging area as a new or updated
    /// sample, then commit.
    Import {
        path: PathBuf,
        #[arg(long, default_value = "master")]
        branch: String,
        arrayset: String,
        key: String,
        file: PathBuf,
        #[arg(long, value_delimiter = ',')]
        shape: Vec<u64>,
        #[arg(long)]
        dtype: CliDType,
        #[arg(long, default_value = "import")]
        message: String,
    },
    /// Read a sample's bytes out to a file.
    Export { path: PathBuf, #[arg(default_value = "master")] branch_or_commit: String, arrayset: String, key: String, file: PathBuf },
    /// Print a sample's shape, dtype, and byte length without dumping bytes.
    View { path: PathBuf, #[arg(default_value = "master")] branch_or_commit: String, arrayset: String, key: String },
}

#[derive(Subcommand)]
pub enum BranchCommand {
    Create { path: PathBuf, name: String, #[arg(default_value = "master")] at: String },
    List { path: PathBuf },
    Remove { path: PathBuf, name: String },
}

#[derive(Subcommand)]
pub enum RemoteCommand {
    Add { path: PathBuf, name: String, address: String },
    Remove { path: PathBuf, name: String },
    List { path: PathBuf },
}

#[derive(Subcommand)]
pub enum MetadataCommand {
    Set { path: PathBuf, #[arg(long, default_value = "master")] branch: String, key: String, value: String },
    Get { path: PathBuf, #[arg(default_value = "master")] branch_or_commit: String, key: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum CliDType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl From<CliDType> for DType {
    fn from(value: CliDType) -> Self {
        match value {
            CliDType::Bool => DType::Bool,
            CliDType::I8 => DType::I8,
            CliDType::I16 => DType::I16,
            CliDType::I32 => DType::I32,
            CliDType::I64 => DType::I64,
            CliDType::U8 => DType::U8,
            CliDType::U16 => DType::U16,
            CliDType::U32 => DType::U32,
            CliDType::U64 => DType::U64,
            CliDType::F32 => DType::F32,
            CliDType::F64 => DType::F64,
        }
    }
}

fn whoami_identity() -> (String, String) {
    let name = whoami::realname();
    let email = format!("{}@{}", whoami::username(), whoami::fallible::hostname().unwrap_or_else(|_| "localhost".into()));
    (name, email)
}

fn sample_key(raw: &str) -> SampleKey {
    match raw.parse::<u64>() {
        Ok(n) => SampleKey::unnamed(n),
        Err(_) => SampleKey::named(raw).unwrap_or_else(|_| SampleKey::unnamed(0)),
    }
}

pub async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Command::Init { path, name, email } => cmd_init(&path, name, email),
        Command::Clone { remote, dest, name, email } => cmd_clone(&remote, &dest, name, email).await,
        Command::Checkout { path, branch_or_commit } => cmd_checkout(&path, &branch_or_commit),
        Command::Branch(sub) => cmd_branch(sub),
        Command::Log { path, branch_or_commit } => cmd_log(&path, &branch_or_commit),
        Command::Summary { path, branch_or_commit } => cmd_summary(&path, &branch_or_commit),
        Command::Fetch { path, remote, branch } => cmd_fetch(&path, &remote, &branch).await,
        Command::FetchData { path, remote, branch_or_commit } => cmd_fetch_data(&path, &remote, &branch_or_commit).await,
        Command::Push { path, remote, branch } => cmd_push(&path, &remote, &branch).await,
        Command::Remote(sub) => cmd_remote(sub),
        Command::Merge { path, master, dev, message } => cmd_merge(&path, &master, &dev, &message),
        Command::Metadata(sub) => cmd_metadata(sub),
        Command::Server { path, addr } => cmd_server(&path, &addr),
        Command::Import { path, branch, arrayset, key, file, shape, dtype, message } => cmd_import(&path, &branch, &arrayset, &key, &file, shape, dtype, &message),
        Command::Export { path, branch_or_commit, arrayset, key, file } => cmd_export(&path, &branch_or_commit, &arrayset, &key, &file),
        Command::View { path, branch_or_commit, arrayset, key } => cmd_view(&path, &branch_or_commit, &arrayset, &key),
    }
}

fn cmd_init(path: &Path, name: Option<String>, email: Option<String>) -> CliResult<()> {
    let (default_name, default_email) = whoami_identity();
    let repo = Repository::init(path, name.unwrap_or(default_name), email.unwrap_or(default_email), Utc::now())?;
    tracing::info!(path = %path.display(), "initialized repository");
    println!("Initialized repository at {}", repo.store_root().display());
    Ok(())
}

async fn cmd_clone(remote: &Path, dest: &Path, name: Option<String>, email: Option<String>) -> CliResult<()> {
    let remote_repo = Repository::open(remote)?;
    let (default_name, default_email) = whoami_identity();
    let local_repo = Repository::init(dest, name.unwrap_or(default_name), email.unwrap_or(default_email), Utc::now())?;

    let remote_transport = LocalTransport::new(&remote_repo);
    let local_transport = LocalTransport::new(&local_repo);
    let head = sync::fetch_refs(&remote_transport, &local_transport, "master").await?;

    let record = local_repo.commit_record(&head)?;
    let digests: Vec<_> = record.refs.arraysets.values().flat_map(|a| a.samples.values()).cloned().collect();
    sync::fetch_data(&remote_transport, &local_transport, &digests).await?;
    local_repo.promote_remote_data()?;

    println!("Cloned {} into {} at {}", remote.display(), dest.display(), head.hex());
    Ok(())
}

fn cmd_checkout(path: &Path, branch_or_commit: &str) -> CliResult<()> {
    let repo = Repository::open(path)?;
    let checkout = repo.checkout_read(branch_or_commit)?;
    println!("commit {}", checkout.commit_digest.hex());
    for name in checkout.arrayset_names() {
        println!("  arrayset {name}");
    }
    Ok(())
}

fn cmd_branch(sub: BranchCommand) -> CliResult<()> {
    match sub {
        BranchCommand::Create { path, name, at } => {
            Repository::open(&path)?.create_branch(&name, &at)?;
            println!("Created branch {name} at {at}");
        }
        BranchCommand::List { path } => {
            for (name, head) in Repository::open(&path)?.branches()? {
                println!("{name}\t{}", head.hex());
            }
        }
        BranchCommand::Remove { path, name } => {
            Repository::open(&path)?.remove_branch(&name)?;
            println!("Removed branch {name}");
        }
    }
    Ok(())
}

fn cmd_log(path: &Path, branch_or_commit: &str) -> CliResult<()> {
    let repo = Repository::open(path)?;
    for record in repo.log(branch_or_commit)? {
        println!("commit {}", record.digest.hex());
        println!("Author: {} <{}>", record.spec.user, record.spec.email);
        println!("Date:   {}", record.spec.time);
        println!();
        println!("    {}", record.spec.message);
        println!();
    }
    Ok(())
}

fn cmd_summary(path: &Path, branch_or_commit: &str) -> CliResult<()> {
    let summary = Repository::open(path)?.summary(branch_or_commit)?;
    println!("commit:    {}", summary.commit.hex());
    println!("arraysets: {}", summary.num_arraysets);
    println!("samples:   {}", summary.num_samples);
    println!("metadata:  {}", summary.num_metadata);
    Ok(())
}

async fn cmd_fetch(path: &Path, remote: &Path, branch: &str) -> CliResult<()> {
    let local_repo = Repository::open(path)?;
    let remote_repo = Repository::open(remote)?;
    let remote_transport = LocalTransport::new(&remote_repo);
    let local_transport = LocalTransport::new(&local_repo);
    let head = sync::fetch_refs(&remote_transport, &local_transport, branch).await?;
    println!("Fetched {branch} at {}", head.hex());
    Ok(())
}

async fn cmd_fetch_data(path: &Path, remote: &Path, branch_or_commit: &str) -> CliResult<()> {
    let local_repo = Repository::open(path)?;
    let remote_repo = Repository::open(remote)?;
    let digest = local_repo.resolve_commit(branch_or_commit)?;
    let record = local_repo.commit_record(&digest)?;
    let digests: Vec<_> = record.refs.arraysets.values().flat_map(|a| a.samples.values()).cloned().collect();

    let remote_transport = LocalTransport::new(&remote_repo);
    let local_transport = LocalTransport::new(&local_repo);
    sync::fetch_data(&remote_transport, &local_transport, &digests).await?;
    local_repo.promote_remote_data()?;
    println!("Fetched data for {} samples at {}", digests.len(), digest.hex());
    Ok(())
}

async fn cmd_push(path: &Path, remote: &Path, branch: &str) -> CliResult<()> {
    let local_repo = Repository::open(path)?;
    let remote_repo = Repository::open(remote)?;
    let local_transport = LocalTransport::new(&local_repo);
    let remote_transport = LocalTransport::new(&remote_repo);
    let head = sync::push(&local_transport, &remote_transport, branch).await?;
    remote_repo.promote_remote_data().ok();
    println!("Pushed {branch} to {}", head.hex());
    Ok(())
}

fn cmd_remote(sub: RemoteCommand) -> CliResult<()> {
    match sub {
        RemoteCommand::Add { path, name, address } => {
            Repository::open(&path)?.add_remote(&name, &address)?;
            println!("Added remote {name} -> {address}");
        }
        RemoteCommand::Remove { path, name } => {
            Repository::open(&path)?.remove_remote(&name)?;
            println!("Removed remote {name}");
        }
        RemoteCommand::List { path } => {
            for (name, address) in Repository::open(&path)?.list_remotes()? {
                println!("{name}\t{address}");
            }
        }
    }
    Ok(())
}

fn cmd_merge(path: &Path, master: &str, dev: &str, message: &str) -> CliResult<()> {
    let repo = Repository::open(path)?;
    let uuid = tensorset_lib::util::random_uid();
    match repo.merge(master, dev, message, Utc::now(), &uuid)? {
        MergeOutcome::FastForward { new_head } => println!("Fast-forwarded {master} to {}", new_head.hex()),
        MergeOutcome::Merged { new_head } => println!("Merged {dev} into {master} at {}", new_head.hex()),
        MergeOutcome::Conflict(report) => return Err(CliError::Message(report.to_string())),
    }
    Ok(())
}

fn cmd_metadata(sub: MetadataCommand) -> CliResult<()> {
    match sub {
        MetadataCommand::Set { path, branch, key, value } => {
            let repo = Repository::open(&path)?;
            let mut wc = repo.checkout_write(&branch, None)?;
            wc.set_metadata(MetadataKey::new(&key).map_err(|e| CliError::Message(e.to_string()))?, value.as_bytes())?;
            wc.commit(format!("set metadata {key}"), Utc::now())?;
            println!("Set {key} = {value}");
        }
        MetadataCommand::Get { path, branch_or_commit, key } => {
            let repo = Repository::open(&path)?;
            let rc = repo.checkout_read(&branch_or_commit)?;
            let value = rc.read_metadata(&MetadataKey::new(&key).map_err(|e| CliError::Message(e.to_string()))?)?;
            println!("{}", String::from_utf8_lossy(&value));
        }
    }
    Ok(())
}

fn cmd_server(path: &Path, addr: &str) -> CliResult<()> {
    let _ = Repository::open(path)?;
    tracing::warn!(addr, "no network transport is implemented; use `fetch`/`push` with a filesystem path to the remote repository instead");
    println!("tensorset does not ship a network server; sync same-machine repositories with `fetch`/`push <remote-path>`");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_import(path: &Path, branch: &str, arrayset: &str, key: &str, file: &Path, shape: Vec<u64>, dtype: CliDType, message: &str) -> CliResult<()> {
    let bytes = std::fs::read(file).map_err(|e| CliError::Io(file.to_path_buf(), e))?;
    let repo = Repository::open(path)?;
    let mut wc = repo.checkout_write(branch, None)?;
    let name = ArraysetName::new(arrayset).map_err(|e| CliError::Message(e.to_string()))?;
    let tensor = Tensor::new(shape.clone(), dtype.into(), bytes);
    match wc.put_sample(&name, sample_key(key), tensor.clone()) {
        Ok(_) => {}
        Err(tensorset_lib::Error::NotFound(_)) => {
            wc.init_arrayset(name.clone(), Schema::new(tensorset_lib::util::random_uid(), shape, dtype.into(), false, true))?;
            wc.put_sample(&name, sample_key(key), tensor)?;
        }
        Err(e) => return Err(e.into()),
    }
    wc.commit(message, Utc::now())?;
    println!("Imported {} into {arrayset}/{key}", file.display());
    Ok(())
}

fn cmd_export(path: &Path, branch_or_commit: &str, arrayset: &str, key: &str, file: &Path) -> CliResult<()> {
    let repo = Repository::open(path)?;
    let mut rc = repo.checkout_read(branch_or_commit)?;
    let name = ArraysetName::new(arrayset).map_err(|e| CliError::Message(e.to_string()))?;
    let tensor = rc.read_sample(&name, &sample_key(key))?;
    std::fs::write(file, &tensor.bytes).map_err(|e| CliError::Io(file.to_path_buf(), e))?;
    println!("Exported {arrayset}/{key} ({} bytes) to {}", tensor.bytes.len(), file.display());
    Ok(())
}

fn cmd_view(path: &Path, branch_or_commit: &str, arrayset: &str, key: &str) -> CliResult<()> {
    let repo = Repository::open(path)?;
    let mut rc = repo.checkout_read(branch_or_commit)?;
    let name = ArraysetName::new(arrayset).map_err(|e| CliError::Message(e.to_string()))?;
    let tensor = rc.read_sample(&name, &sample_key(key))?;
    println!("shape:  {:?}", tensor.shape);
    println!("dtype:  {:?}", tensor.dtype);
    println!("bytes:  {}", tensor.bytes.len());
    Ok(())
}
