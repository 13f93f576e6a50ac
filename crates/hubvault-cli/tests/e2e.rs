//! End-to-end tests for the HTTP clients.
//!
//! Starts fake HubSpot and M-Files servers on loopback ports, backed by the
//! in-memory doubles from hubvault-core, and drives the real reqwest clients
//! through the sync engine, the file reconciler and the attach pipeline.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use hubvault_cli::{Credentials, HubSpotClient, MFilesClient};
use hubvault_core::crm::{CrmClient, CrmError, CrmFile, CrmObject, InMemoryCrm};
use hubvault_core::ids::defs;
use hubvault_core::property::PropertyValue;
use hubvault_core::vault::{
    FileUpload, InMemoryVault, PropertyFilter, UploadedFile, VaultClient, VaultError,
};
use hubvault_core::{
    AttachRequest, ContactStage, DuplicatePolicy, ExternalId, FileReconcileOutcome, ObjectKind,
    ObjectType, SyncAction, SyncEngine, VaultObjectRef, attach_document, document,
    documents_for, reconcile_company_files,
};

const HUBSPOT_TOKEN: &str = "pat-test";
const VAULT_TOKEN: &str = "vault-session";

type HandlerResult = Result<Json<Value>, StatusCode>;

// ---------------------------------------------------------------------------
// Fake HubSpot
// ---------------------------------------------------------------------------

fn hubspot_authorized(headers: &HeaderMap) -> Result<(), StatusCode> {
    let expected = format!("Bearer {}", HUBSPOT_TOKEN);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn crm_status(err: CrmError) -> StatusCode {
    match err {
        CrmError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn split_list(query: &HashMap<String, String>, key: &str) -> Vec<String> {
    query
        .get(key)
        .map(|v| {
            v.split(',')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

async fn hs_get_company(
    State(crm): State<Arc<InMemoryCrm>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HandlerResult {
    hubspot_authorized(&headers)?;
    let properties = split_list(&query, "properties");
    let associations = split_list(&query, "associations");
    let properties: Vec<&str> = properties.iter().map(String::as_str).collect();
    let associations: Vec<&str> = associations.iter().map(String::as_str).collect();

    let company = crm
        .get_company(&id, &properties, &associations)
        .await
        .map_err(crm_status)?;
    Ok(Json(json!(company)))
}

async fn hs_patch_company(
    State(crm): State<Arc<InMemoryCrm>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> HandlerResult {
    hubspot_authorized(&headers)?;
    let properties = body["properties"]
        .as_object()
        .ok_or(StatusCode::BAD_REQUEST)?;

    let mut updated = None;
    for (name, value) in properties {
        let value = value.as_str().ok_or(StatusCode::BAD_REQUEST)?;
        updated = Some(
            crm.update_company_property(&id, name, value)
                .await
                .map_err(crm_status)?,
        );
    }
    updated
        .map(|company| Json(json!(company)))
        .ok_or(StatusCode::BAD_REQUEST)
}

async fn hs_get_contact(
    State(crm): State<Arc<InMemoryCrm>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    hubspot_authorized(&headers)?;
    let contact = crm.get_contact(&id).await.map_err(crm_status)?;
    Ok(Json(json!(contact)))
}

async fn hs_search_files(
    State(crm): State<Arc<InMemoryCrm>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HandlerResult {
    hubspot_authorized(&headers)?;
    let page = crm
        .list_files(query.get("after").map(String::as_str))
        .await
        .map_err(crm_status)?;

    let mut body = json!({ "results": page.results });
    if let Some(after) = page.next_after {
        body["paging"] = json!({ "next": { "after": after, "link": "ignored" } });
    }
    Ok(Json(body))
}

fn hubspot_router(crm: Arc<InMemoryCrm>) -> Router {
    Router::new()
        .route(
            "/crm/v3/objects/companies/{id}",
            get(hs_get_company).patch(hs_patch_company),
        )
        .route("/crm/v3/objects/contacts/{id}", get(hs_get_contact))
        .route("/files/v3/files/search", get(hs_search_files))
        .with_state(crm)
}

// ---------------------------------------------------------------------------
// Fake M-Files
// ---------------------------------------------------------------------------

fn vault_authorized(headers: &HeaderMap) -> Result<(), StatusCode> {
    match headers.get("x-authentication").and_then(|v| v.to_str().ok()) {
        Some(token) if token == VAULT_TOKEN => Ok(()),
        _ => Err(StatusCode::FORBIDDEN),
    }
}

fn object_type(id: i32) -> Result<ObjectType, StatusCode> {
    ObjectType::from_id(id).ok_or(StatusCode::NOT_FOUND)
}

fn vault_status(err: VaultError) -> StatusCode {
    match err {
        VaultError::Rejected { status, .. } => {
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn mf_login(Json(body): Json<Value>) -> HandlerResult {
    let valid = body["Username"] == "sync" && body["Password"] == "secret";
    if !valid || body["VaultGuid"].as_str().is_none() {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(Json(json!({ "Value": VAULT_TOKEN })))
}

async fn mf_list_root(headers: HeaderMap) -> HandlerResult {
    vault_authorized(&headers)?;
    Ok(Json(json!({ "Items": [] })))
}

async fn mf_search(
    State(vault): State<Arc<InMemoryVault>>,
    Path(type_id): Path<i32>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> HandlerResult {
    vault_authorized(&headers)?;
    let filters: Vec<PropertyFilter> = query
        .iter()
        .filter_map(|(key, value)| {
            let def = key.strip_prefix('p')?.parse::<u32>().ok()?;
            Some(PropertyFilter::new(def, value.clone()))
        })
        .collect();

    let items = vault
        .find_objects(object_type(type_id)?, &filters)
        .await
        .map_err(vault_status)?;
    Ok(Json(json!({ "Items": items })))
}

async fn mf_create(
    State(vault): State<Arc<InMemoryVault>>,
    Path(type_id): Path<i32>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> HandlerResult {
    vault_authorized(&headers)?;
    let properties: Vec<PropertyValue> = serde_json::from_value(body["PropertyValues"].clone())
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let files: Vec<UploadedFile> =
        serde_json::from_value(body["Files"].clone()).map_err(|_| StatusCode::BAD_REQUEST)?;

    let ver = vault
        .create_object(object_type(type_id)?, &properties, &files)
        .await
        .map_err(vault_status)?;
    Ok(Json(json!({ "ObjVer": ver, "Title": "", "Class": 0 })))
}

async fn mf_get_properties(
    State(vault): State<Arc<InMemoryVault>>,
    Path((type_id, id)): Path<(i32, i64)>,
    headers: HeaderMap,
) -> HandlerResult {
    vault_authorized(&headers)?;
    let properties = vault
        .get_properties(object_type(type_id)?, id)
        .await
        .map_err(vault_status)?;
    Ok(Json(json!(properties)))
}

async fn mf_set_properties(
    State(vault): State<Arc<InMemoryVault>>,
    Path((type_id, id)): Path<(i32, i64)>,
    headers: HeaderMap,
    Json(properties): Json<Vec<PropertyValue>>,
) -> HandlerResult {
    vault_authorized(&headers)?;
    let ver = vault
        .update_properties(object_type(type_id)?, id, &properties)
        .await
        .map_err(vault_status)?;
    Ok(Json(json!({ "ObjVer": ver })))
}

async fn mf_destroy(
    State(vault): State<Arc<InMemoryVault>>,
    Path((type_id, id)): Path<(i32, i64)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    vault_authorized(&headers)?;
    if query.get("allVersions").map(String::as_str) != Some("true") {
        return Err(StatusCode::BAD_REQUEST);
    }
    vault
        .destroy_object(object_type(type_id)?, id)
        .await
        .map_err(vault_status)?;
    Ok(StatusCode::NO_CONTENT)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Pulls the file name and content of the single part out of a multipart body.
fn multipart_file(body: &[u8]) -> Option<(String, Vec<u8>)> {
    let name_start = find(body, b"filename=\"", 0)? + b"filename=\"".len();
    let name_end = find(body, b"\"", name_start)?;
    let file_name = String::from_utf8(body[name_start..name_end].to_vec()).ok()?;

    let content_start = find(body, b"\r\n\r\n", name_end)? + 4;
    let content_end = body
        .windows(4)
        .rposition(|w| w == b"\r\n--")
        .filter(|end| *end >= content_start)?;
    Some((file_name, body[content_start..content_end].to_vec()))
}

async fn mf_upload(
    State(vault): State<Arc<InMemoryVault>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    vault_authorized(&headers)?;
    let (file_name, bytes) = multipart_file(&body).ok_or(StatusCode::BAD_REQUEST)?;
    let upload = FileUpload {
        file_name,
        content_type: None,
        bytes,
    };
    let uploaded = vault.upload_file(&upload).await.map_err(vault_status)?;

    let mut body = json!(uploaded);
    body["TempFilePath"] = json!("C:\\Temp\\upload.tmp");
    Ok(Json(body))
}

async fn mf_get_object(
    State(vault): State<Arc<InMemoryVault>>,
    Path((type_id, id)): Path<(i32, i64)>,
    headers: HeaderMap,
) -> HandlerResult {
    vault_authorized(&headers)?;
    let object = vault
        .get_object(object_type(type_id)?, id)
        .await
        .map_err(vault_status)?;
    Ok(Json(json!(object)))
}

async fn mf_file_content(
    State(vault): State<Arc<InMemoryVault>>,
    Path((type_id, id, file_id)): Path<(i32, i64, i64)>,
    headers: HeaderMap,
) -> Result<Vec<u8>, StatusCode> {
    vault_authorized(&headers)?;
    if object_type(type_id)? != ObjectType::Document {
        return Err(StatusCode::NOT_FOUND);
    }
    let mut content = Vec::new();
    vault
        .download_file(id, file_id, &mut content)
        .await
        .map_err(vault_status)?;
    Ok(content)
}

fn vault_router(vault: Arc<InMemoryVault>) -> Router {
    Router::new()
        .route("/REST/server/authenticationtokens", post(mf_login))
        .route("/REST/objects", get(mf_list_root))
        .route("/REST/objects/{type_id}", get(mf_search).post(mf_create))
        .route("/REST/objects/{type_id}/{id}", get(mf_get_object))
        .route(
            "/REST/objects/{type_id}/{id}/files/{file_id}/content",
            get(mf_file_content),
        )
        .route(
            "/REST/objects/{type_id}/{id}/latest/properties",
            get(mf_get_properties).post(mf_set_properties),
        )
        .route(
            "/REST/objects/{type_id}/{id}/latest",
            axum::routing::delete(mf_destroy),
        )
        .route("/REST/files", post(mf_upload))
        .with_state(vault)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    addr
}

struct Harness {
    crm: Arc<InMemoryCrm>,
    vault: Arc<InMemoryVault>,
    hubspot: HubSpotClient,
    mfiles: MFilesClient,
    hubspot_addr: SocketAddr,
    vault_addr: SocketAddr,
}

impl Harness {
    async fn start(crm: InMemoryCrm) -> Self {
        let crm = Arc::new(crm);
        let vault = Arc::new(InMemoryVault::new());
        let hubspot_addr = serve(hubspot_router(crm.clone())).await;
        let vault_addr = serve(vault_router(vault.clone())).await;

        let hubspot = HubSpotClient::new(
            &format!("http://{}", hubspot_addr),
            HUBSPOT_TOKEN,
            Duration::from_secs(5),
        )
        .unwrap();
        let mfiles =
            MFilesClient::new(&format!("http://{}/REST", vault_addr), Duration::from_secs(5))
                .unwrap()
                .with_token(VAULT_TOKEN);

        Self {
            crm,
            vault,
            hubspot,
            mfiles,
            hubspot_addr,
            vault_addr,
        }
    }
}

fn acme(contacts: &[&str]) -> CrmObject {
    let mut company = CrmObject::new("10")
        .with_property("name", Some("Acme"))
        .with_property("domain", Some("acme.io"))
        .with_property("phone", None);
    for id in contacts {
        company = company.with_association("contacts", id);
    }
    company
}

fn contact(id: &str, first: &str) -> CrmObject {
    CrmObject::new(id)
        .with_property("firstname", Some(first))
        .with_property("lastname", Some("Lovelace"))
        .with_property("email", Some("ada@acme.io"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sync_company_over_http() {
    let crm = InMemoryCrm::new();
    crm.insert_company(acme(&["1", "2", "1"]));
    crm.insert_contact(contact("1", "Ada"));
    // "2" is linked but HubSpot answers 404 for it
    let h = Harness::start(crm).await;

    let engine = SyncEngine::new(&h.hubspot, &h.mfiles);
    let first = engine.synchronize_company("10").await.unwrap();

    assert!(first.success);
    assert_eq!(first.action, Some(SyncAction::Created));
    assert_eq!(first.linked_contacts, Some(1));
    assert_eq!(first.failed_contacts.len(), 1);
    assert_eq!(first.failed_contacts[0].contact_id, "2");
    assert_eq!(first.failed_contacts[0].stage, ContactStage::Fetch);

    let mf_id = first.mf_id.unwrap();
    let props = h.vault.properties(ObjectType::Company, mf_id).unwrap();
    let text = |def| {
        props
            .iter()
            .find(|p| p.property_def == def)
            .and_then(|p| p.as_text().map(String::from))
    };
    assert_eq!(text(defs::NAME).as_deref(), Some("Acme"));
    assert_eq!(text(defs::DOMAIN).as_deref(), Some("acme.io"));
    assert_eq!(text(defs::PHONE).as_deref(), Some(""));
    assert_eq!(text(defs::EXTERNAL_ID).as_deref(), Some("10"));
    assert_eq!(text(defs::EXTERNAL_TYPE).as_deref(), Some("0-2"));

    let second = engine.synchronize_company("10").await.unwrap();
    assert_eq!(second.action, Some(SyncAction::Updated));
    assert_eq!(second.mf_id, Some(mf_id));
    assert_eq!(h.vault.object_count(ObjectType::Company), 1);
    assert_eq!(h.vault.object_count(ObjectType::Contact), 1);
    assert_eq!(h.vault.creations(), 2);
}

#[tokio::test]
async fn test_sync_missing_company_over_http() {
    let h = Harness::start(InMemoryCrm::new()).await;

    let result = SyncEngine::new(&h.hubspot, &h.mfiles)
        .synchronize_company("404")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some("Company not found in HubSpot"));
    assert!(h.vault.writes().is_empty());
}

#[tokio::test]
async fn test_reconcile_files_over_http_follows_pages() {
    let crm = InMemoryCrm::with_page_size(2);
    crm.insert_company(acme(&[]).with_property(
        "files",
        Some(r#"[{"id":"a","name":"a.pdf"},{"id":"b"},{"id":"e","note":"kept"}]"#),
    ));
    for id in ["a", "c", "d", "e", "f"] {
        crm.add_file(CrmFile::new(id));
    }
    let h = Harness::start(crm).await;

    let outcome = reconcile_company_files(&h.hubspot, "10").await.unwrap();
    let FileReconcileOutcome::Reconciled { kept, removed, .. } = outcome else {
        panic!("expected reconciliation");
    };
    let kept: Vec<&str> = kept.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(kept, vec!["a", "e"]);
    assert_eq!(removed.len(), 1);

    let stored = h.crm.company("10").unwrap();
    let stored: Value = serde_json::from_str(stored.property("files").unwrap()).unwrap();
    assert_eq!(
        stored,
        json!([{"id": "a", "name": "a.pdf"}, {"id": "e", "note": "kept"}])
    );
}

#[tokio::test]
async fn test_reconcile_missing_company_over_http() {
    let h = Harness::start(InMemoryCrm::new()).await;
    let outcome = reconcile_company_files(&h.hubspot, "10").await.unwrap();
    assert_eq!(outcome, FileReconcileOutcome::CompanyNotFound);
    assert_eq!(
        serde_json::to_value(outcome.report()).unwrap(),
        json!({"success": false, "message": "Company not found"})
    );
    assert!(h.crm.updates().is_empty());
}

#[tokio::test]
async fn test_login_attach_list_and_delete() {
    let h = Harness::start(InMemoryCrm::new()).await;
    let base = format!("http://{}/REST/", h.vault_addr);

    let token = MFilesClient::new(&base, Duration::from_secs(5))
        .unwrap()
        .login(&Credentials {
            username: "sync".to_string(),
            password: "secret".to_string(),
            vault_guid: "{0000}".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(token, VAULT_TOKEN);

    let company_id = h.vault.insert_object(
        ObjectType::Company,
        vec![
            PropertyValue::text(defs::NAME, "Acme"),
            PropertyValue::text(defs::EXTERNAL_ID, "10"),
            PropertyValue::text(defs::EXTERNAL_TYPE, "0-2"),
        ],
    );

    let request = AttachRequest {
        file: FileUpload {
            file_name: "contract.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            bytes: b"%PDF-1.7".to_vec(),
        },
        title: "Contract".to_string(),
        target: VaultObjectRef::new(ObjectKind::Company, company_id),
    };
    let ver = attach_document(&h.mfiles, &request).await.unwrap();

    let stored = h.vault.files(ObjectType::Document, ver.id);
    assert_eq!(stored[0].title, "contract.pdf");
    assert_eq!(stored[0].extension, "pdf");
    assert!(stored[0].extra.contains_key("TempFilePath"));

    let listed = documents_for(
        &h.mfiles,
        ObjectKind::Company,
        &ExternalId::new("10").unwrap(),
        DuplicatePolicy::default(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(listed.mf_id, company_id);
    assert_eq!(listed.documents.len(), 1);
    assert_eq!(listed.documents[0].title, "Contract");
    assert_eq!(listed.documents[0].files[0].extension, "pdf");

    h.mfiles
        .destroy_object(ObjectType::Document, ver.id)
        .await
        .unwrap();
    assert_eq!(h.vault.object_count(ObjectType::Document), 0);
}

#[tokio::test]
async fn test_read_document_props_and_download_file() {
    let h = Harness::start(InMemoryCrm::new()).await;
    let contact_id = h.vault.insert_object(
        ObjectType::Contact,
        vec![
            PropertyValue::text(defs::NAME, "Ada"),
            PropertyValue::text(defs::EXTERNAL_ID, "7"),
            PropertyValue::text(defs::EXTERNAL_TYPE, "0-1"),
        ],
    );
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let request = AttachRequest {
        file: FileUpload {
            file_name: "scan.bin".to_string(),
            content_type: None,
            bytes: content.clone(),
        },
        title: "Scan".to_string(),
        target: VaultObjectRef::new(ObjectKind::Contact, contact_id),
    };
    let ver = attach_document(&h.mfiles, &request).await.unwrap();

    let doc = document(&h.mfiles, ver.id).await.unwrap();
    assert_eq!(doc.object_id, ver.id);
    assert_eq!(doc.title, "Scan");
    assert_eq!(doc.files.len(), 1);
    assert_eq!(doc.files[0].extension, "bin");
    assert_eq!(doc.files[0].size, content.len() as u64);

    let props = h
        .mfiles
        .get_properties(ObjectType::Document, ver.id)
        .await
        .unwrap();
    let contact_link = props
        .iter()
        .find(|p| p.property_def == defs::CONTACT)
        .unwrap();
    assert_eq!(contact_link.lookup_ids(), vec![contact_id]);

    let dir = std::env::temp_dir().join(format!("hubvault-e2e-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("scan.bin");
    let mut file = tokio::fs::File::create(&path).await.unwrap();
    let written = h
        .mfiles
        .download_file(ver.id, doc.files[0].id, &mut file)
        .await
        .unwrap();
    drop(file);
    assert_eq!(written, content.len() as u64);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), content);
    tokio::fs::remove_dir_all(&dir).await.unwrap();

    let mut sink = Vec::new();
    let err = h
        .mfiles
        .download_file(ver.id, doc.files[0].id + 1, &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn test_bad_credentials_are_rejected() {
    let h = Harness::start(InMemoryCrm::new()).await;

    let err = MFilesClient::new(&format!("http://{}/REST", h.vault_addr), Duration::from_secs(5))
        .unwrap()
        .login(&Credentials {
            username: "sync".to_string(),
            password: "wrong".to_string(),
            vault_guid: "{0000}".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Rejected { status: 403, .. }));

    let anonymous =
        MFilesClient::new(&format!("http://{}/REST", h.vault_addr), Duration::from_secs(5))
            .unwrap();
    let err = anonymous
        .find_objects(ObjectType::Company, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Rejected { status: 403, .. }));

    let hubspot = HubSpotClient::new(
        &format!("http://{}", h.hubspot_addr),
        "wrong",
        Duration::from_secs(5),
    )
    .unwrap();
    let err = hubspot.get_contact("1").await.unwrap_err();
    assert!(matches!(err, CrmError::Rejected { status: 401, .. }));
}
