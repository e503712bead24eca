//! In-memory object store for pipeline tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{ExportError, Result};

use super::{CompletedPart, ObjectLocation, ObjectStore};

#[derive(Default)]
struct Session {
    location: Option<ObjectLocation>,
    parts: BTreeMap<i32, Vec<u8>>,
}

/// Records every call so tests can inspect objects, parts and aborts.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    sessions: Mutex<HashMap<String, Session>>,
    /// Parts of completed sessions, in upload order
    completed_parts: Mutex<Vec<Vec<u8>>>,
    aborted: Mutex<Vec<String>>,
    puts: AtomicUsize,
    next_id: AtomicUsize,
    fail_part: Option<i32>,
    fail_complete: bool,
    /// Abort calls still to reject
    failing_aborts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `upload_part` fails for the given part number.
    pub fn failing_part(part_number: i32) -> Self {
        Self {
            fail_part: Some(part_number),
            ..Self::default()
        }
    }

    /// A store whose `complete_multipart` always fails.
    pub fn failing_complete() -> Self {
        Self {
            fail_complete: true,
            ..Self::default()
        }
    }

    /// Reject the next `count` abort calls.
    pub fn with_failing_aborts(self, count: usize) -> Self {
        self.failing_aborts.store(count, Ordering::SeqCst);
        self
    }

    pub fn object(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(location.bucket.clone(), location.key.clone()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn completed_parts(&self) -> Vec<Vec<u8>> {
        self.completed_parts.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert((location.bucket.clone(), location.key.clone()), body);
        Ok(())
    }

    async fn begin_multipart(&self, location: &ObjectLocation) -> Result<String> {
        let id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().unwrap().insert(
            id.clone(),
            Session {
                location: Some(location.clone()),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        _location: &ObjectLocation,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        if self.fail_part == Some(part_number) {
            return Err(ExportError::upload(format!("part {part_number} rejected")));
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| ExportError::upload(format!("no session {upload_id}")))?;
        session.parts.insert(part_number, body);
        Ok(format!("etag-{part_number}"))
    }

    async fn complete_multipart(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        if self.fail_complete {
            return Err(ExportError::upload("InternalError: please retry"));
        }
        let session = self
            .sessions
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| ExportError::upload(format!("no session {upload_id}")))?;
        assert_eq!(session.location.as_ref(), Some(location));

        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        let mut sorted = numbers.clone();
        sorted.sort_unstable();
        assert_eq!(numbers, sorted, "parts must be listed in ascending order");

        let mut body = Vec::new();
        let mut uploaded = Vec::new();
        for part in parts {
            let bytes = session
                .parts
                .get(&part.part_number)
                .ok_or_else(|| ExportError::upload(format!("missing part {}", part.part_number)))?;
            assert_eq!(part.tag, format!("etag-{}", part.part_number));
            body.extend_from_slice(bytes);
            uploaded.push(bytes.clone());
        }
        self.completed_parts.lock().unwrap().extend(uploaded);
        self.objects
            .lock()
            .unwrap()
            .insert((location.bucket.clone(), location.key.clone()), body);
        Ok(())
    }

    async fn abort_multipart(&self, _location: &ObjectLocation, upload_id: &str) -> Result<()> {
        let rejected = self
            .failing_aborts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(ExportError::upload(format!("abort of {upload_id} timed out")));
        }
        self.sessions.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }
}
