//! Shared test harness and fixtures.

use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use lopdf::{dictionary, Object, Stream};

use selo_blob::FsBlobStore;
use selo_crypto::{Clock, ManualClock, OsEntropy};
use selo_notify_memory::MemoryNotifier;
use selo_storage::{
    AuthChannel, CreateUserParams, Document, Role, Signer, Store, Tenant, User,
};
use selo_store_sqlite::SqliteStore;

use crate::config::ServerConfig;
use crate::handlers::documents::{self, InviteRequest, SignerDescriptor, UploadRequest};
use crate::server::{ActorInfo, SeloServer};

pub struct TestContext {
    pub server: Arc<SeloServer>,
    pub notifier: Arc<MemoryNotifier>,
    pub clock: Arc<ManualClock>,
    pub tenant: Tenant,
    pub owner: User,
    _blob_dir: tempfile::TempDir,
}

pub fn test_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

pub async fn test_context() -> TestContext {
    let clock = Arc::new(ManualClock::new(test_start()));
    let clock_dyn: Arc<dyn Clock> = clock.clone();

    let store = Arc::new(
        SqliteStore::open_in_memory(Arc::clone(&clock_dyn))
            .await
            .unwrap(),
    );
    let blob_dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MemoryNotifier::new());

    let config = ServerConfig {
        blob_root: blob_dir.path().to_path_buf(),
        // Cheapest legal cost; these are tests, not production hashes
        bcrypt_cost: 4,
        ..ServerConfig::default()
    };

    let server = Arc::new(SeloServer {
        store,
        blob: Arc::new(FsBlobStore::new(blob_dir.path())),
        notifier: notifier.clone(),
        clock: clock_dyn,
        entropy: Arc::new(OsEntropy),
        config,
    });

    let tenant = server.store.create_tenant("acme").await.unwrap();
    let owner = server
        .store
        .create_user(&CreateUserParams {
            tenant_id: tenant.id,
            email: format!("owner-{}@acme.test", uuid::Uuid::new_v4()),
            name: "Olivia Owner".into(),
            role: Role::Admin,
        })
        .await
        .unwrap();

    TestContext {
        server,
        notifier,
        clock,
        tenant,
        owner,
        _blob_dir: blob_dir,
    }
}

pub fn actor() -> ActorInfo {
    ActorInfo {
        ip: "127.0.0.1".into(),
        user_agent: "selo-tests".into(),
    }
}

/// Give detached notification tasks a chance to run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Minimal n-page PDF, unique per call so content hashes don't collide
/// between tests sharing a database.
pub fn pdf_bytes(page_count: usize) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let marker = format!("BT ({}) Tj ET", uuid::Uuid::new_v4());
    let mut kids = Vec::new();
    for _ in 0..page_count {
        let content_id = doc.add_object(Stream::new(dictionary! {}, marker.clone().into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(12, 6, image::Rgba([10, 20, 30, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

pub fn png_base64() -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(png_bytes())
}

pub async fn upload(
    ctx: &TestContext,
    title: &str,
    deadline_at: Option<DateTime<Utc>>,
) -> Document {
    documents::upload_document(
        &ctx.server,
        &ctx.owner,
        &actor(),
        UploadRequest {
            title: Some(title.into()),
            deadline_at,
            file_name: "contract.pdf".into(),
            mime_type: "application/pdf".into(),
            bytes: pdf_bytes(2),
        },
    )
    .await
    .unwrap()
}

pub fn email_signer(email: &str) -> SignerDescriptor {
    SignerDescriptor {
        name: format!("Signer {}", email),
        email: email.into(),
        phone: None,
        cpf: None,
        qualification: None,
        auth_channels: vec![AuthChannel::Email],
        order: None,
    }
}

/// Invite one signer and capture the cleartext token off the notifier (the
/// only place it ever exists).
pub async fn invite(ctx: &TestContext, document: &Document, email: &str) -> (Signer, String) {
    let signers = documents::invite_signers(
        &ctx.server,
        &ctx.owner,
        &actor(),
        &document.id,
        InviteRequest {
            signers: vec![email_signer(email)],
            message: None,
        },
    )
    .await
    .unwrap();
    let signer = signers.into_iter().next().unwrap();

    settle().await;
    let token = ctx
        .notifier
        .sent_of_kind("signer_invited")
        .into_iter()
        .rev()
        .find_map(|n| match n {
            selo_notify::Notification::SignerInvited {
                recipient,
                signing_url,
                ..
            } if recipient == email => {
                Some(signing_url.rsplit('/').next().unwrap().to_string())
            }
            _ => None,
        })
        .expect("invite notification with signing url");

    (signer, token)
}

/// Most recent one-time code delivered to a recipient.
pub async fn delivered_code(ctx: &TestContext, recipient: &str) -> String {
    settle().await;
    ctx.notifier
        .sent_of_kind("otp_code")
        .into_iter()
        .rev()
        .find_map(|n| match n {
            selo_notify::Notification::OtpCode {
                recipient: r, code, ..
            } if r == recipient => Some(code),
            _ => None,
        })
        .expect("otp code notification")
}
