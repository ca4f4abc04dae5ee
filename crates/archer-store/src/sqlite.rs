use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use archer_types::{
    ArcherError, ArcherResult, Evaluation, EvaluationId, EvaluationResult, GeneratedOutput,
    LineageLink, OutputId, Prompt, PromptId, PromptPerformance,
};

use crate::adapter::{now, AnnotationItem, DatabaseAdapter, GenerationMetrics, PromptHistoryEntry};
use crate::aggregate::{mean_score_for_prompt, performance_metrics, rank_best_prompts, rank_prompts_by_id};

/// SQLite-backed `DatabaseAdapter`. Connection setup uses WAL journal
/// mode, a busy timeout, and `CREATE TABLE IF NOT EXISTS` schema
/// initialization. All blocking rusqlite calls run on
/// `tokio::task::spawn_blocking` so the async runtime is never stalled.
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> ArcherResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ArcherError::Store(format!("failed to create store directory: {e}")))?;
            }
        }

        let connection = Connection::open(path)
            .map_err(|e| ArcherError::Store(format!("failed to open sqlite store: {e}")))?;
        connection
            .busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ArcherError::Store(e.to_string()))?;
        connection
            .execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                "#,
            )
            .map_err(|e| ArcherError::Store(e.to_string()))?;

        initialize_schema(&connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub fn open_in_memory() -> ArcherResult<Self> {
        let connection =
            Connection::open_in_memory().map_err(|e| ArcherError::Store(e.to_string()))?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn with_connection<T, F>(&self, f: F) -> ArcherResult<T>
    where
        F: FnOnce(&Connection) -> ArcherResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| ArcherError::Store(format!("blocking task join error: {e}")))?
    }
}

fn initialize_schema(connection: &Connection) -> ArcherResult<()> {
    connection
        .execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                generation INTEGER NOT NULL,
                parent_id TEXT,
                model_id TEXT NOT NULL,
                purpose TEXT NOT NULL,
                survived INTEGER NOT NULL DEFAULT 0,
                score REAL,
                feedback TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_prompts_generation ON prompts(generation);

            CREATE TABLE IF NOT EXISTS prompt_performance (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                prompt_id TEXT NOT NULL,
                avg_score REAL,
                survived INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generated_outputs (
                id TEXT PRIMARY KEY,
                prompt_id TEXT NOT NULL,
                input_data TEXT NOT NULL,
                content TEXT NOT NULL,
                round_num INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outputs_round ON generated_outputs(round_num);
            CREATE INDEX IF NOT EXISTS idx_outputs_prompt ON generated_outputs(prompt_id);

            CREATE TABLE IF NOT EXISTS evaluations (
                id TEXT PRIMARY KEY,
                output_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                score INTEGER,
                feedback TEXT NOT NULL,
                improved_output TEXT NOT NULL,
                raw TEXT,
                is_human INTEGER NOT NULL,
                evaluator_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_evaluations_output ON evaluations(output_id);

            CREATE TABLE IF NOT EXISTS lineage (
                child_id TEXT NOT NULL,
                parent_id TEXT NOT NULL,
                generation_delta INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| ArcherError::Store(e.to_string()))?;
    Ok(())
}

fn parse_uuid(raw: &str, field: &str) -> ArcherResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ArcherError::Store(format!("corrupt {field} uuid: {e}")))
}

fn parse_timestamp(raw: &str) -> ArcherResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ArcherError::Store(format!("corrupt timestamp: {e}")))
}

fn load_prompt(row: &rusqlite::Row<'_>) -> ArcherResult<Prompt> {
    let id: String = row.get(0).map_err(|e| ArcherError::Store(e.to_string()))?;
    let content: String = row.get(1).map_err(|e| ArcherError::Store(e.to_string()))?;
    let generation: i64 = row.get(2).map_err(|e| ArcherError::Store(e.to_string()))?;
    let parent_id: Option<String> = row.get(3).map_err(|e| ArcherError::Store(e.to_string()))?;
    let model_id: String = row.get(4).map_err(|e| ArcherError::Store(e.to_string()))?;
    let survived: i64 = row.get(6).map_err(|e| ArcherError::Store(e.to_string()))?;
    let score: Option<f64> = row.get(7).map_err(|e| ArcherError::Store(e.to_string()))?;
    let feedback: Option<String> = row.get(8).map_err(|e| ArcherError::Store(e.to_string()))?;
    let created_at: String = row.get(9).map_err(|e| ArcherError::Store(e.to_string()))?;

    Ok(Prompt {
        id: parse_uuid(&id, "prompt")?,
        content,
        generation: generation as u32,
        score,
        feedback,
        survived: survived != 0,
        parent_id: parent_id.map(|p| parse_uuid(&p, "parent")).transpose()?,
        model_id,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn load_output(row: &rusqlite::Row<'_>) -> ArcherResult<GeneratedOutput> {
    let id: String = row.get(0).map_err(|e| ArcherError::Store(e.to_string()))?;
    let prompt_id: String = row.get(1).map_err(|e| ArcherError::Store(e.to_string()))?;
    let input_data: String = row.get(2).map_err(|e| ArcherError::Store(e.to_string()))?;
    let content: String = row.get(3).map_err(|e| ArcherError::Store(e.to_string()))?;
    let round_num: i64 = row.get(4).map_err(|e| ArcherError::Store(e.to_string()))?;
    let created_at: String = row.get(5).map_err(|e| ArcherError::Store(e.to_string()))?;

    Ok(GeneratedOutput {
        id: parse_uuid(&id, "output")?,
        prompt_id: parse_uuid(&prompt_id, "prompt")?,
        input_data,
        content,
        round_num: round_num as u32,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn load_evaluation(row: &rusqlite::Row<'_>) -> ArcherResult<Evaluation> {
    let id: String = row.get(0).map_err(|e| ArcherError::Store(e.to_string()))?;
    let output_id: String = row.get(1).map_err(|e| ArcherError::Store(e.to_string()))?;
    let kind: String = row.get(2).map_err(|e| ArcherError::Store(e.to_string()))?;
    let score: Option<i64> = row.get(3).map_err(|e| ArcherError::Store(e.to_string()))?;
    let feedback: String = row.get(4).map_err(|e| ArcherError::Store(e.to_string()))?;
    let improved_output: String = row.get(5).map_err(|e| ArcherError::Store(e.to_string()))?;
    let raw: Option<String> = row.get(6).map_err(|e| ArcherError::Store(e.to_string()))?;
    let is_human: i64 = row.get(7).map_err(|e| ArcherError::Store(e.to_string()))?;
    let evaluator_id: String = row.get(8).map_err(|e| ArcherError::Store(e.to_string()))?;
    let created_at: String = row.get(9).map_err(|e| ArcherError::Store(e.to_string()))?;

    let result = match kind.as_str() {
        "scored" => EvaluationResult::Scored {
            score: score.unwrap_or_default() as u8,
            feedback,
            improved_output,
        },
        "coerced" => EvaluationResult::Coerced {
            score: score.unwrap_or_default() as u8,
            feedback,
            improved_output,
        },
        _ => EvaluationResult::ParseError {
            raw: raw.unwrap_or_default(),
        },
    };

    Ok(Evaluation {
        id: parse_uuid(&id, "evaluation")?,
        output_id: parse_uuid(&output_id, "output")?,
        result,
        is_human: is_human != 0,
        evaluator_id,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn evaluation_columns(result: &EvaluationResult) -> (&'static str, Option<i64>, &str, &str, Option<&str>) {
    match result {
        EvaluationResult::Scored { score, feedback, improved_output } => {
            ("scored", Some(*score as i64), feedback.as_str(), improved_output.as_str(), None)
        }
        EvaluationResult::Coerced { score, feedback, improved_output } => {
            ("coerced", Some(*score as i64), feedback.as_str(), improved_output.as_str(), None)
        }
        EvaluationResult::ParseError { raw } => ("parse_error", None, "parse_error", "", Some(raw.as_str())),
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteStore {
    async fn store_prompt(
        &self,
        content: &str,
        model: &str,
        purpose: &str,
        generation: u32,
        parent_id: Option<PromptId>,
    ) -> ArcherResult<PromptId> {
        let content = content.to_string();
        let model = model.to_string();
        let purpose = purpose.to_string();
        let id = Uuid::new_v4();
        let created_at = now().to_rfc3339();

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO prompts (id, content, generation, parent_id, model_id, purpose, survived, score, feedback, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, NULL, ?7)",
                params![
                    id.to_string(),
                    content,
                    generation as i64,
                    parent_id.map(|p| p.to_string()),
                    model,
                    purpose,
                    created_at,
                ],
            )
            .map_err(|e| ArcherError::Store(e.to_string()))?;
            Ok(id)
        })
        .await
    }

    async fn update_prompt_performance(
        &self,
        prompt_id: PromptId,
        avg_score: Option<f64>,
        survived: bool,
    ) -> ArcherResult<()> {
        let recorded_at = now().to_rfc3339();

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO prompt_performance (prompt_id, avg_score, survived, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![prompt_id.to_string(), avg_score, survived as i64, recorded_at],
            )
            .map_err(|e| ArcherError::Store(e.to_string()))?;

            conn.execute(
                "UPDATE prompts SET score = ?1, survived = ?2 WHERE id = ?3",
                params![avg_score, survived as i64, prompt_id.to_string()],
            )
            .map_err(|e| ArcherError::Store(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn store_generated_content(
        &self,
        input_data: &str,
        content: &str,
        prompt_id: PromptId,
        round_num: u32,
    ) -> ArcherResult<OutputId> {
        let input_data = input_data.to_string();
        let content = content.to_string();
        let id = Uuid::new_v4();
        let created_at = now().to_rfc3339();

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO generated_outputs (id, prompt_id, input_data, content, round_num, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id.to_string(), prompt_id.to_string(), input_data, content, round_num as i64, created_at],
            )
            .map_err(|e| ArcherError::Store(e.to_string()))?;
            Ok(id)
        })
        .await
    }

    async fn store_evaluation(
        &self,
        output_id: OutputId,
        result: EvaluationResult,
        is_human: bool,
        evaluator_id: &str,
    ) -> ArcherResult<EvaluationId> {
        let evaluator_id = evaluator_id.to_string();
        let id = Uuid::new_v4();
        let created_at = now().to_rfc3339();

        self.with_connection(move |conn| {
            let (kind, score, feedback, improved_output, raw) = evaluation_columns(&result);
            conn.execute(
                "INSERT INTO evaluations (id, output_id, kind, score, feedback, improved_output, raw, is_human, evaluator_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    output_id.to_string(),
                    kind,
                    score,
                    feedback,
                    improved_output,
                    raw,
                    is_human as i64,
                    evaluator_id,
                    created_at,
                ],
            )
            .map_err(|e| ArcherError::Store(e.to_string()))?;
            Ok(id)
        })
        .await
    }

    async fn record_lineage(&self, link: LineageLink) -> ArcherResult<()> {
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO lineage (child_id, parent_id, generation_delta) VALUES (?1, ?2, ?3)",
                params![link.child_id.to_string(), link.parent_id.to_string(), link.generation_delta],
            )
            .map_err(|e| ArcherError::Store(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_current_data_for_annotation(
        &self,
        round_num: u32,
        limit: u32,
    ) -> ArcherResult<Vec<AnnotationItem>> {
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, prompt_id, input_data, content, round_num, created_at
                     FROM generated_outputs WHERE round_num = ?1 ORDER BY id LIMIT ?2",
                )
                .map_err(|e| ArcherError::Store(e.to_string()))?;
            let outputs = stmt
                .query_map(params![round_num as i64, limit as i64], |row| {
                    Ok(row_values_for_output(row))
                })
                .map_err(|e| ArcherError::Store(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ArcherError::Store(e.to_string()))?;

            let mut items = Vec::with_capacity(outputs.len());
            for row in outputs {
                let output = load_output_values(row)?;
                let ai_evaluation = fetch_ai_evaluation(conn, output.id)?;
                items.push(AnnotationItem {
                    output_id: output.id,
                    input: output.input_data,
                    content: output.content,
                    prompt_id: output.prompt_id,
                    ai_evaluation,
                });
            }
            Ok(items)
        })
        .await
    }

    async fn get_current_best_prompts(&self, top_n: u32) -> ArcherResult<Vec<Prompt>> {
        self.with_connection(move |conn| {
            let (prompts, outputs, evaluations) = load_all(conn)?;
            Ok(rank_best_prompts(&prompts, &outputs, &evaluations, top_n))
        })
        .await
    }

    async fn get_prompts_by_ids(&self, ids: &[PromptId]) -> ArcherResult<Vec<Prompt>> {
        let ids: Vec<PromptId> = ids.to_vec();
        self.with_connection(move |conn| {
            let (prompts, outputs, evaluations) = load_all(conn)?;
            Ok(rank_prompts_by_id(&prompts, &outputs, &evaluations, &ids))
        })
        .await
    }

    async fn get_performance_metrics(&self, max_rounds: u32) -> ArcherResult<Vec<GenerationMetrics>> {
        self.with_connection(move |conn| {
            let (prompts, outputs, evaluations) = load_all(conn)?;
            Ok(performance_metrics(&prompts, &outputs, &evaluations, max_rounds))
        })
        .await
    }

    async fn get_prompt_history(&self) -> ArcherResult<Vec<PromptHistoryEntry>> {
        self.with_connection(move |conn| {
            let (prompts, outputs, evaluations) = load_all(conn)?;
            let mut entries: Vec<PromptHistoryEntry> = prompts
                .iter()
                .map(|p| {
                    let excerpt: String = p.content.chars().take(80).collect();
                    PromptHistoryEntry {
                        generation: p.generation,
                        prompt_id: p.id,
                        parent_id: p.parent_id,
                        content_excerpt: excerpt,
                        mean_score: mean_score_for_prompt(&outputs, &evaluations, p.id).0,
                    }
                })
                .collect();
            entries.sort_by(|a, b| a.generation.cmp(&b.generation).then(a.prompt_id.cmp(&b.prompt_id)));
            Ok(entries)
        })
        .await
    }
}

struct OutputRowValues {
    id: String,
    prompt_id: String,
    input_data: String,
    content: String,
    round_num: i64,
    created_at: String,
}

fn row_values_for_output(row: &rusqlite::Row<'_>) -> OutputRowValues {
    OutputRowValues {
        id: row.get_unwrap(0),
        prompt_id: row.get_unwrap(1),
        input_data: row.get_unwrap(2),
        content: row.get_unwrap(3),
        round_num: row.get_unwrap(4),
        created_at: row.get_unwrap(5),
    }
}

fn load_output_values(values: OutputRowValues) -> ArcherResult<GeneratedOutput> {
    Ok(GeneratedOutput {
        id: parse_uuid(&values.id, "output")?,
        prompt_id: parse_uuid(&values.prompt_id, "prompt")?,
        input_data: values.input_data,
        content: values.content,
        round_num: values.round_num as u32,
        created_at: parse_timestamp(&values.created_at)?,
    })
}

fn fetch_ai_evaluation(conn: &Connection, output_id: OutputId) -> ArcherResult<Option<Evaluation>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, output_id, kind, score, feedback, improved_output, raw, is_human, evaluator_id, created_at
             FROM evaluations WHERE output_id = ?1 AND is_human = 0 ORDER BY created_at DESC LIMIT 1",
        )
        .map_err(|e| ArcherError::Store(e.to_string()))?;

    stmt.query_row(params![output_id.to_string()], load_evaluation)
        .optional()
        .map_err(|e| ArcherError::Store(e.to_string()))?
        .transpose()
}

fn load_all(conn: &Connection) -> ArcherResult<(Vec<Prompt>, Vec<GeneratedOutput>, Vec<Evaluation>)> {
    let mut prompt_stmt = conn
        .prepare(
            "SELECT id, content, generation, parent_id, model_id, purpose, survived, score, feedback, created_at FROM prompts",
        )
        .map_err(|e| ArcherError::Store(e.to_string()))?;
    let prompts = prompt_stmt
        .query_map([], load_prompt)
        .map_err(|e| ArcherError::Store(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ArcherError::Store(e.to_string()))?;

    let mut output_stmt = conn
        .prepare("SELECT id, prompt_id, input_data, content, round_num, created_at FROM generated_outputs")
        .map_err(|e| ArcherError::Store(e.to_string()))?;
    let outputs = output_stmt
        .query_map([], load_output)
        .map_err(|e| ArcherError::Store(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ArcherError::Store(e.to_string()))?;

    let mut eval_stmt = conn
        .prepare(
            "SELECT id, output_id, kind, score, feedback, improved_output, raw, is_human, evaluator_id, created_at FROM evaluations",
        )
        .map_err(|e| ArcherError::Store(e.to_string()))?;
    let evaluations = eval_stmt
        .query_map([], load_evaluation)
        .map_err(|e| ArcherError::Store(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ArcherError::Store(e.to_string()))?;

    Ok((prompts, outputs, evaluations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scored(score: u8) -> EvaluationResult {
        EvaluationResult::Scored {
            score,
            feedback: "ok".to_string(),
            improved_output: "better".to_string(),
        }
    }

    #[tokio::test]
    async fn round_trips_prompt_and_evaluation_through_disk() {
        let dir = tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path().join("archer.sqlite")).expect("open store");

        let prompt_id = store
            .store_prompt("Summarize: {input}", "gpt-4o-mini", "summary", 0, None)
            .await
            .unwrap();
        let output_id = store
            .store_generated_content("article", "a summary", prompt_id, 0)
            .await
            .unwrap();
        store.store_evaluation(output_id, scored(4), false, "ai-judge").await.unwrap();
        store.update_prompt_performance(prompt_id, Some(4.0), true).await.unwrap();

        let best = store.get_current_best_prompts(1).await.unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].id, prompt_id);
        assert_eq!(best[0].score, Some(4.0));
    }

    #[tokio::test]
    async fn parse_error_evaluations_round_trip_with_null_score() {
        let store = SqliteStore::open_in_memory().expect("open in-memory store");
        let prompt_id = store
            .store_prompt("A: {input}", "gpt-4o-mini", "p", 0, None)
            .await
            .unwrap();
        let output_id = store.store_generated_content("x", "y", prompt_id, 0).await.unwrap();
        store
            .store_evaluation(
                output_id,
                EvaluationResult::ParseError { raw: "prose".to_string() },
                false,
                "ai-judge",
            )
            .await
            .unwrap();

        let annotation = store.get_current_data_for_annotation(0, 10).await.unwrap();
        assert_eq!(annotation.len(), 1);
        let ai_eval = annotation[0].ai_evaluation.as_ref().expect("ai evaluation present");
        assert_eq!(ai_eval.effective_score(), None);
    }
}
