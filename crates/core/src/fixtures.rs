//! Builders for in-memory test documents, shared by the session and
//! workspace tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use quire_pdf_engine::default_engine;
use quire_search::DisabledOcr;

use crate::session::{Session, SessionConfig, SessionEvent, SharedEngine};

pub(crate) fn test_config() -> SessionConfig {
    SessionConfig::default()
        .with_worker_count(2)
        .with_poll_interval(Duration::from_millis(1))
        .with_preview_dpi(72)
}

pub(crate) fn shared_engine() -> SharedEngine {
    Arc::new(Mutex::new(default_engine()))
}

pub(crate) fn open_session(texts: &[&str]) -> Session {
    Session::open(build_pdf(texts), shared_engine(), Arc::new(DisabledOcr), test_config())
        .unwrap()
}

/// One page per entry, each drawing its text in 12pt Courier. Resources
/// and MediaBox sit on the page tree node, as real writers produce them.
pub(crate) fn build_pdf(texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(texts.len());
    for text in texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = texts.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub(crate) fn encrypted_pdf() -> Vec<u8> {
    let mut doc = Document::load_mem(&build_pdf(&["secret"])).unwrap();
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "O" => Object::String(vec![0; 32], StringFormat::Literal),
        "U" => Object::String(vec![0; 32], StringFormat::Literal),
        "P" => -44,
    });
    doc.trailer.set("Encrypt", encrypt_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Repeatedly drains session events until `done` returns true, panicking
/// after `deadline_ms`. Returns everything drained along the way.
pub(crate) fn drain_until(
    session: &mut Session,
    deadline_ms: u64,
    mut done: impl FnMut(&Session, &[SessionEvent]) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    let mut events = Vec::new();

    loop {
        events.extend(session.drain_events());
        if done(session, &events) {
            return events;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for background work; events so far: {events:?}");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
