use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::document_parser::DocumentExtractor;
use super::errors::CoreError;
use super::fingerprint::{Claim, FingerprintIndex};
use super::matching::MatchingEngine;
use super::models::{
    BatchEntry, BatchReport, DocumentInput, DocumentOutcome, FailureKind, JobRequirements,
    MatchScore, PipelineSettings, SourceMetadata,
};
use super::normalizer::ResumeNormalizer;
use super::record_builder::{BuiltRecord, CandidateRecordBuilder};
use super::store::{PersistRecord, RowResult, StorePool};

/// A document that made it through the CPU stages and now waits for the store.
struct PendingRecord {
    index: usize,
    file_name: String,
    fingerprint: String,
    record: PersistRecord,
    issues: Vec<String>,
}

enum Staged {
    Done(BatchEntry),
    Persist(PendingRecord),
}

/// Drives extract, normalize, build and match over a batch with bounded parallelism and
/// hands finished records to the store in fixed-size groups.
pub struct BulkIngestionBatcher {
    extractor: Arc<dyn DocumentExtractor>,
    normalizer: Arc<ResumeNormalizer>,
    builder: Arc<CandidateRecordBuilder>,
    pool: StorePool,
    index: Arc<FingerprintIndex>,
    settings: PipelineSettings,
}

impl BulkIngestionBatcher {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        normalizer: Arc<ResumeNormalizer>,
        pool: StorePool,
        index: Arc<FingerprintIndex>,
        settings: PipelineSettings,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self {
            extractor,
            normalizer,
            builder: Arc::new(CandidateRecordBuilder::new(&settings)),
            pool,
            index,
            settings,
        })
    }

    /// Every input document appears in the report exactly once, in input order.
    ///
    /// Configuration problems fail the call before any document is touched. After
    /// `cancel` fires no further documents are admitted; documents already in flight
    /// finish and are persisted, the rest are reported as cancelled.
    pub async fn ingest_batch(
        &self,
        run_id: String,
        documents: Vec<DocumentInput>,
        job: &JobRequirements,
        engine: Arc<MatchingEngine>,
        cancel: CancellationToken,
    ) -> Result<BatchReport, CoreError> {
        engine.validate_job(job)?;

        let started_at = Utc::now();
        let total = documents.len();
        let file_names: Vec<String> = documents.iter().map(|d| d.file_name.clone()).collect();
        tracing::info!(
            run_id = %run_id,
            job_id = %job.job_id,
            job_version = job.version,
            documents = total,
            workers = self.settings.worker_count,
            "batch ingestion started"
        );

        let (tx, mut rx) = mpsc::channel::<PendingRecord>(self.settings.high_water_mark);

        let producer = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            async move {
                let mut done = Vec::new();
                let mut staged = stream::iter(documents.into_iter().enumerate())
                    .take_while(move |_| future::ready(!cancel.is_cancelled()))
                    .map(|(index, document)| {
                        let engine = Arc::clone(&engine);
                        async move { self.stage_document(index, document, job, engine).await }
                    })
                    .buffer_unordered(self.settings.worker_count);

                while let Some(item) = staged.next().await {
                    match item {
                        Staged::Done(entry) => done.push(entry),
                        Staged::Persist(pending) => {
                            // A full channel parks the producer, which stops admission.
                            if let Err(mpsc::error::SendError(pending)) = tx.send(pending).await {
                                done.push(BatchEntry {
                                    index: pending.index,
                                    file_name: pending.file_name,
                                    outcome: DocumentOutcome::Cancelled,
                                });
                            }
                        }
                    }
                }
                drop(tx);
                done
            }
        };

        let consumer = async {
            let group_size = self.settings.persist_batch_size;
            let mut persisted = Vec::new();
            let mut group = Vec::with_capacity(group_size);

            while let Some(pending) = rx.recv().await {
                group.push(pending);
                if group.len() >= group_size {
                    let full = std::mem::replace(&mut group, Vec::with_capacity(group_size));
                    persisted.extend(self.persist_group(&run_id, full).await);
                }
            }
            if !group.is_empty() {
                persisted.extend(self.persist_group(&run_id, group).await);
            }
            persisted
        };

        let (done, persisted) = tokio::join!(producer, consumer);

        let mut slots: Vec<Option<BatchEntry>> = vec![None; total];
        for entry in done.into_iter().chain(persisted) {
            let index = entry.index;
            if index < total {
                slots[index] = Some(entry);
            }
        }
        let entries: Vec<BatchEntry> = slots
            .into_iter()
            .zip(file_names)
            .enumerate()
            .map(|(index, (slot, file_name))| {
                slot.unwrap_or(BatchEntry {
                    index,
                    file_name,
                    outcome: DocumentOutcome::Cancelled,
                })
            })
            .collect();

        let report = BatchReport::assemble(run_id, job, entries, cancel.is_cancelled(), started_at);
        tracing::info!(
            run_id = %report.run_id,
            outcome = ?report.outcome,
            succeeded = report.summary.succeeded,
            parse_failed = report.summary.parse_failed,
            duplicates = report.summary.duplicates,
            failed_to_persist = report.summary.failed_to_persist,
            cancelled = report.summary.cancelled,
            duration_seconds = report.duration_seconds,
            "batch ingestion finished"
        );
        Ok(report)
    }

    async fn stage_document(
        &self,
        index: usize,
        document: DocumentInput,
        job: &JobRequirements,
        engine: Arc<MatchingEngine>,
    ) -> Staged {
        let file_name = document.file_name.clone();
        let failed = |kind: FailureKind, reason: String| {
            Staged::Done(BatchEntry {
                index,
                file_name: file_name.clone(),
                outcome: DocumentOutcome::ParseFailed { kind, reason },
            })
        };

        let extracted = match self
            .extractor
            .extract(&document.file_name, &document.bytes)
            .await
        {
            Ok(extracted) => extracted,
            Err(err) => {
                tracing::debug!(file_name = %file_name, error = %err, "extraction failed");
                return failed(FailureKind::Extraction, err.to_string());
            }
        };
        drop(document);

        let source = SourceMetadata {
            file_name: file_name.clone(),
            byte_len: extracted.byte_len,
            format: extracted.format,
            ingested_at: Utc::now(),
        };

        let normalizer = Arc::clone(&self.normalizer);
        let builder = Arc::clone(&self.builder);
        let cpu_engine = Arc::clone(&engine);
        let cpu_job = job.clone();
        let built = tokio::task::spawn_blocking(move || -> Result<(BuiltRecord, MatchScore), CoreError> {
            let normalized = normalizer.normalize(&extracted.text, extracted.format);
            let built = builder.build(&normalized, cpu_engine.lexicon(), source)?;
            let score = cpu_engine.score(&built.candidate, &cpu_job)?;
            Ok((built, score))
        })
        .await;

        let (built, score) = match built {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return failed(FailureKind::Parse, err.to_string()),
            Err(err) => return failed(FailureKind::Parse, format!("parse worker failed: {err}")),
        };

        let candidate = built.candidate;
        let claim = self
            .index
            .claim(&candidate.fingerprint, &candidate.id, &job.job_id, job.version)
            .await;

        match claim {
            Claim::Claimed => Staged::Persist(PendingRecord {
                index,
                file_name,
                fingerprint: candidate.fingerprint.clone(),
                record: PersistRecord::NewCandidate { candidate, score },
                issues: built.issues,
            }),
            Claim::Existing {
                candidate_id,
                needs_refresh: false,
            } => Staged::Done(BatchEntry {
                index,
                file_name,
                outcome: DocumentOutcome::Duplicate {
                    existing_candidate_id: candidate_id,
                    refreshed_score: None,
                },
            }),
            Claim::Existing {
                candidate_id,
                needs_refresh: true,
            } => match self.rescore_existing(&candidate_id, job, &engine).await {
                Some(score) => Staged::Persist(PendingRecord {
                    index,
                    file_name,
                    fingerprint: candidate.fingerprint,
                    record: PersistRecord::ScoreRefresh { score },
                    issues: Vec::new(),
                }),
                None => {
                    self.index
                        .forget_version(&candidate.fingerprint, &job.job_id, job.version)
                        .await;
                    Staged::Done(BatchEntry {
                        index,
                        file_name,
                        outcome: DocumentOutcome::Duplicate {
                            existing_candidate_id: candidate_id,
                            refreshed_score: None,
                        },
                    })
                }
            },
        }
    }

    async fn rescore_existing(
        &self,
        candidate_id: &str,
        job: &JobRequirements,
        engine: &MatchingEngine,
    ) -> Option<MatchScore> {
        let loaded = match self.pool.acquire().await {
            Ok(conn) => conn.load_candidate(candidate_id).await,
            Err(err) => Err(err),
        };

        match loaded {
            Ok(Some(existing)) => match engine.score(&existing, job) {
                Ok(score) => Some(score),
                Err(err) => {
                    tracing::warn!(candidate_id, error = %err, "rescoring duplicate failed");
                    None
                }
            },
            Ok(None) => {
                tracing::warn!(candidate_id, "duplicate points at a candidate missing from the store");
                None
            }
            Err(err) => {
                tracing::warn!(candidate_id, error = %err, "failed to load duplicate for rescoring");
                None
            }
        }
    }

    async fn persist_group(&self, run_id: &str, group: Vec<PendingRecord>) -> Vec<BatchEntry> {
        let records: Vec<PersistRecord> = group.iter().map(|p| p.record.clone()).collect();
        let max_attempts = self.settings.max_retries;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let result = match self.pool.acquire().await {
                Ok(conn) => conn.upsert_records(&records).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(rows) if rows.len() == group.len() => {
                    tracing::debug!(run_id, records = rows.len(), attempt, "persisted group");
                    return self.resolve_rows(group, rows).await;
                }
                Ok(rows) => {
                    last_error = format!(
                        "store returned {} results for {} records",
                        rows.len(),
                        group.len()
                    );
                    break;
                }
                Err(err) => {
                    last_error = err.to_string();
                    let is_last_attempt = attempt + 1 >= max_attempts;
                    if err.is_retryable() && !is_last_attempt {
                        let backoff_seconds =
                            self.settings.retry_delay_seconds * 2_f64.powf(attempt as f64);
                        tracing::warn!(
                            run_id,
                            attempt = attempt + 1,
                            backoff_seconds,
                            free_connections = self.pool.available(),
                            error = %err,
                            "persistence failed; retrying group"
                        );
                        tokio::time::sleep(Duration::from_secs_f64(backoff_seconds)).await;
                        continue;
                    }
                    break;
                }
            }
        }

        tracing::error!(
            run_id,
            records = group.len(),
            error = %last_error,
            "persistence retries exhausted; group marked failed_to_persist"
        );
        let mut entries = Vec::with_capacity(group.len());
        for pending in group {
            entries.push(self.fail_pending(pending, last_error.clone()).await);
        }
        entries
    }

    async fn resolve_rows(&self, group: Vec<PendingRecord>, rows: Vec<RowResult>) -> Vec<BatchEntry> {
        let mut entries = Vec::with_capacity(group.len());
        for (pending, row) in group.into_iter().zip(rows) {
            let entry = match (row, &pending.record) {
                (RowResult::Stored, PersistRecord::NewCandidate { candidate, score }) => BatchEntry {
                    index: pending.index,
                    file_name: pending.file_name,
                    outcome: DocumentOutcome::Succeeded {
                        candidate_id: candidate.id.clone(),
                        score: score.clone(),
                        issues: pending.issues,
                    },
                },
                (RowResult::Stored, PersistRecord::ScoreRefresh { score }) => BatchEntry {
                    index: pending.index,
                    file_name: pending.file_name,
                    outcome: DocumentOutcome::Duplicate {
                        existing_candidate_id: score.candidate_id.clone(),
                        refreshed_score: Some(score.clone()),
                    },
                },
                (RowResult::Conflict { existing_candidate_id }, _) => {
                    self.index
                        .adopt(&pending.fingerprint, &existing_candidate_id)
                        .await;
                    BatchEntry {
                        index: pending.index,
                        file_name: pending.file_name,
                        outcome: DocumentOutcome::Duplicate {
                            existing_candidate_id,
                            refreshed_score: None,
                        },
                    }
                }
                (RowResult::Rejected(reason), _) => self.fail_pending(pending, reason).await,
            };
            entries.push(entry);
        }
        entries
    }

    /// Record a failed write, keeping the computed score and undoing the fingerprint claim.
    async fn fail_pending(&self, pending: PendingRecord, reason: String) -> BatchEntry {
        let (candidate_id, score) = match pending.record {
            PersistRecord::NewCandidate { candidate, score } => {
                self.index.release(&pending.fingerprint, &candidate.id).await;
                (candidate.id, score)
            }
            PersistRecord::ScoreRefresh { score } => {
                self.index
                    .forget_version(&pending.fingerprint, &score.job_id, score.job_version)
                    .await;
                (score.candidate_id.clone(), score)
            }
        };

        BatchEntry {
            index: pending.index,
            file_name: pending.file_name,
            outcome: DocumentOutcome::FailedToPersist {
                candidate_id,
                score,
                reason,
            },
        }
    }
}
