//! hubvault: Mirrors HubSpot companies and contacts into an M-Files vault.
//!
//! Every command prints one JSON document to stdout. Logs go to stderr.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hubvault_cli::{Config, Credentials, HubSpotClient, MFilesClient};
use hubvault_core::{
    AssociationMode, AttachRequest, ContactFailurePolicy, DuplicatePolicy, ExternalId,
    FileUpload, ObjectKind, ObjectType, SyncEngine, SyncOptions,
    VaultClient, VaultObjectRef, attach_document, document, documents_for,
    reconcile_company_files,
};

#[derive(Parser, Debug)]
#[command(name = "hubvault")]
#[command(about = "HubSpot to M-Files synchronization")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange vault credentials for a session token
    Login {
        #[arg(long, env = "MFILES_USERNAME")]
        username: String,
        #[arg(long, env = "MFILES_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, env = "MFILES_VAULT_GUID")]
        vault_guid: String,
    },

    /// Create or update the vault mirror of a company and its contacts
    SyncCompany {
        /// HubSpot company id
        company_id: String,

        #[command(flatten)]
        session: Session,

        /// How an existing contact's company list is rewritten (replace|merge)
        #[arg(long, default_value = "replace")]
        association_mode: AssociationMode,

        /// What to do with several vault objects for one record (first|reject)
        #[arg(long, default_value = "first")]
        duplicates: DuplicatePolicy,

        /// What to do when one contact fails (collect|abort)
        #[arg(long, default_value = "collect")]
        contact_failures: ContactFailurePolicy,
    },

    /// Drop file references the HubSpot file manager no longer lists
    ReconcileFiles {
        /// HubSpot company id
        company_id: String,
    },

    /// Upload a file as a vault document linked to a company or contact
    Attach {
        /// Object kind of the target: company, contact, 0-2 or 0-1
        kind: ObjectKind,

        /// Vault id of the target object
        mf_id: i64,

        /// File to upload
        file: PathBuf,

        /// Document title
        #[arg(long)]
        title: String,

        /// MIME type sent with the upload
        #[arg(long)]
        content_type: Option<String>,

        #[command(flatten)]
        session: Session,
    },

    /// List the vault documents linked to a HubSpot record
    Documents {
        /// Object kind: company, contact, 0-2 or 0-1
        kind: ObjectKind,

        /// HubSpot record id
        external_id: ExternalId,

        #[command(flatten)]
        session: Session,
    },

    /// Show one vault document and its files
    Document {
        /// Vault id of the document
        document_id: i64,

        #[command(flatten)]
        session: Session,
    },

    /// Show the property values of a vault document
    DocumentProps {
        /// Vault id of the document
        document_id: i64,

        #[command(flatten)]
        session: Session,
    },

    /// Save the content of a document's file
    Download {
        /// Vault id of the document
        document_id: i64,

        /// Id of the file within the document
        file_id: i64,

        /// Destination path
        #[arg(long, short)]
        output: PathBuf,

        #[command(flatten)]
        session: Session,
    },

    /// Destroy a vault document and all its versions
    DeleteDocument {
        /// Vault id of the document
        document_id: i64,

        #[command(flatten)]
        session: Session,
    },
}

#[derive(Args, Debug)]
struct Session {
    /// Vault session token from `hubvault login`
    #[arg(long = "mf-token", env = "MFILES_TOKEN", hide_env_values = true)]
    token: String,
}

fn vault_client(config: &Config, session: &Session) -> Result<MFilesClient> {
    let client = MFilesClient::new(&config.mfiles_base_url, config.timeout)
        .context("Failed to create M-Files client")?;
    Ok(client.with_token(&session.token))
}

fn crm_client(config: &Config) -> Result<HubSpotClient> {
    let token = config.hubspot_token()?;
    HubSpotClient::new(&config.hubspot_base_url, token, config.timeout)
        .context("Failed to create HubSpot client")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Login {
            username,
            password,
            vault_guid,
        } => {
            let client = MFilesClient::new(&config.mfiles_base_url, config.timeout)?;
            let credentials = Credentials {
                username,
                password,
                vault_guid,
            };
            let token = client.login(&credentials).await.context("Login failed")?;
            print_json(&json!({ "token": token }))
        }

        Command::SyncCompany {
            company_id,
            session,
            association_mode,
            duplicates,
            contact_failures,
        } => {
            let crm = crm_client(config)?;
            let vault = vault_client(config, &session)?;
            let options = SyncOptions {
                duplicates,
                contact_failures,
                associations: association_mode,
            };
            debug!("Sync options: {:?}", options);

            let result = SyncEngine::new(&crm, &vault)
                .with_options(options)
                .synchronize_company(&company_id)
                .await
                .with_context(|| format!("Failed to synchronize company {}", company_id))?;
            print_json(&result)
        }

        Command::ReconcileFiles { company_id } => {
            let crm = crm_client(config)?;
            let outcome = reconcile_company_files(&crm, &company_id)
                .await
                .with_context(|| format!("Failed to reconcile files of company {}", company_id))?;
            print_json(&outcome.report())
        }

        Command::Attach {
            kind,
            mf_id,
            file,
            title,
            content_type,
            session,
        } => {
            let vault = vault_client(config, &session)?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;
            let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
                bail!("Not a file path: {:?}", file);
            };

            let request = AttachRequest {
                file: FileUpload {
                    file_name: file_name.to_string(),
                    content_type,
                    bytes,
                },
                title,
                target: VaultObjectRef::new(kind, mf_id),
            };
            let ver = attach_document(&vault, &request)
                .await
                .context("Failed to attach document")?;
            print_json(&ver)
        }

        Command::Documents {
            kind,
            external_id,
            session,
        } => {
            let vault = vault_client(config, &session)?;
            let documents = documents_for(&vault, kind, &external_id, DuplicatePolicy::default())
                .await
                .with_context(|| format!("Failed to list documents of {} {}", kind, external_id))?;
            match documents {
                Some(documents) => print_json(&documents),
                None => bail!("No vault record for {} {}", kind, external_id),
            }
        }

        Command::Document {
            document_id,
            session,
        } => {
            let vault = vault_client(config, &session)?;
            let doc = document(&vault, document_id)
                .await
                .with_context(|| format!("Failed to read document {}", document_id))?;
            print_json(&doc)
        }

        Command::DocumentProps {
            document_id,
            session,
        } => {
            let vault = vault_client(config, &session)?;
            let properties = vault
                .get_properties(ObjectType::Document, document_id)
                .await
                .with_context(|| format!("Failed to read properties of document {}", document_id))?;
            print_json(&properties)
        }

        Command::Download {
            document_id,
            file_id,
            output,
            session,
        } => {
            let vault = vault_client(config, &session)?;
            let mut file = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("Failed to create {:?}", output))?;
            let size = vault
                .download_file(document_id, file_id, &mut file)
                .await
                .with_context(|| {
                    format!("Failed to download file {} of document {}", file_id, document_id)
                })?;
            info!("Saved {} byte(s) to {:?}", size, output);
            print_json(&json!({ "success": true, "path": output, "size": size }))
        }

        Command::DeleteDocument {
            document_id,
            session,
        } => {
            let vault = vault_client(config, &session)?;
            vault
                .destroy_object(ObjectType::Document, document_id)
                .await
                .with_context(|| format!("Failed to delete document {}", document_id))?;
            info!("Deleted document {}", document_id);
            print_json(&json!({ "success": true, "deleted": document_id }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "debug,hubvault=debug,hubvault_cli=debug,hubvault_core=debug"
    } else {
        "info,hubvault=info,hubvault_cli=info,hubvault_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    debug!("M-Files base URL: {}", config.mfiles_base_url);

    run(cli.command, &config).await
}
