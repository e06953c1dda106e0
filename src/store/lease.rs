//! Writer lease: the opaque token granting exclusive write access.
//!
//! Mutations live on the lease itself, so holding one is the only way
//! to reach them. Dropping (or cancelling) a lease without committing
//! discards the in-flight work before the next holder can append.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::error::{Result, WaxError};
use crate::store::engine::Engine;
use crate::store::StoreShared;
use crate::toc::Toc;
use crate::types::{FrameDraft, FrameId};

/// Exclusive write access to a [`crate::store::Store`]. Released on
/// drop; uncommitted mutations are aborted, never half-applied.
#[derive(Debug)]
pub struct WriterLease {
    shared: Arc<StoreShared>,
    permit: Option<OwnedMutexGuard<()>>,
    released: bool,
}

impl WriterLease {
    pub(crate) fn new(shared: Arc<StoreShared>, permit: OwnedMutexGuard<()>) -> Self {
        Self {
            shared,
            permit: Some(permit),
            released: false,
        }
    }

    /// Assigns the next dense frame id, appends a `put_frame` WAL
    /// record, and returns the id. The frame becomes readable at the
    /// next successful commit.
    pub async fn put(&mut self, canonical: Vec<u8>, draft: FrameDraft) -> Result<FrameId> {
        self.with_engine_write(move |engine| engine.put(&canonical, draft))
            .await
    }

    /// Marks an active frame deleted. Metadata is retained; the payload
    /// stops being served.
    pub async fn delete(&mut self, frame_id: FrameId) -> Result<()> {
        self.with_engine_write(move |engine| engine.delete(frame_id))
            .await
    }

    /// Links `new` as the successor of `old`; both link fields are
    /// stamped mutually at commit time.
    pub async fn supersede(&mut self, old: FrameId, new: FrameId) -> Result<()> {
        self.with_engine_write(move |engine| engine.supersede(old, new))
            .await
    }

    /// Stages an embedding vector for a frame.
    pub async fn put_embedding(&mut self, frame_id: FrameId, vector: Vec<f32>) -> Result<()> {
        self.with_engine_write(move |engine| engine.put_embedding(frame_id, vector))
            .await
    }

    /// Stages an opaque full-text index blob for the next commit.
    pub async fn stage_lex_index(&mut self, bytes: Vec<u8>, doc_count: u64) -> Result<()> {
        self.with_engine_write(move |engine| engine.stage_lex_index(bytes, doc_count))
            .await
    }

    /// Stages an opaque vector index blob for the next commit.
    pub async fn stage_vector_index(
        &mut self,
        bytes: Vec<u8>,
        dimension: u32,
        count: u64,
    ) -> Result<()> {
        self.with_engine_write(move |engine| engine.stage_vector_index(bytes, dimension, count))
            .await
    }

    /// Runs the commit protocol and publishes the new read snapshot.
    /// Returns the new file generation.
    pub async fn commit(&mut self) -> Result<u64> {
        self.with_engine_write(|engine| engine.commit()).await
    }

    /// Discards all pending mutations and staged blobs.
    pub async fn abort(&mut self) -> Result<()> {
        self.with_engine_write(|engine| engine.abort()).await
    }

    /// Explicitly releases the lease, aborting uncommitted work first.
    pub async fn release(mut self) -> Result<()> {
        let result = self.abort().await;
        self.released = true;
        self.permit.take();
        result
    }

    async fn with_engine_write<T, F>(&mut self, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Engine) -> Result<T> + Send + 'static,
    {
        let _write = self.shared.op_lock_write().await;
        let engine_arc = self.shared.engine_arc();
        let before = self.shared.current_generation();
        let (value, publish) = self
            .shared
            .io()
            .run_exclusive(move || {
                let mut guard = engine_arc.lock();
                let engine = guard.as_mut().ok_or(WaxError::StoreClosed)?;
                let value = body(engine)?;
                let generation = engine.generation();
                let publish = (generation != before)
                    .then(|| (Arc::new(engine.toc().clone()), generation));
                Ok::<(T, Option<(Arc<Toc>, u64)>), WaxError>((value, publish))
            })
            .await??;
        if let Some((toc, generation)) = publish {
            self.shared.publish(toc, generation);
        }
        Ok(value)
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Hold the lease permit until the abort lands so the next
        // holder cannot append before the rewind.
        let permit = self.permit.take();
        let engine_arc = self.shared.engine_arc();
        let spawned = self.shared.io().spawn_exclusive(move || {
            let _hold = permit;
            if let Some(engine) = engine_arc.lock().as_mut() {
                if let Err(err) = engine.abort() {
                    tracing::warn!(error = %err, "abort on lease drop failed");
                }
            }
        });
        if spawned.is_err() {
            tracing::warn!("executor gone before lease cleanup");
        }
    }
}
