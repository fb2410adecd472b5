use super::model::{OverviewInsert, StudyflowRef};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{
    NewQuestion, Question, QuestionType, Resource, Studyflow, MARKDOWN_MIME, OVERVIEW_FILENAME,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{instrument, warn};
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Studyflows
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn create_studyflow(pool: &Pool, title: &str) -> PipelineResult<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO studyflows (id, title, created_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(title)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn find_studyflow(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<Option<Studyflow>> {
    let row = sqlx::query(
        "SELECT id, title, indicator_resource_id, created_at FROM studyflows WHERE id = ?",
    )
    .bind(studyflow_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(Studyflow {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        indicator_resource_id: row.try_get("indicator_resource_id")?,
        created_at: row.try_get("created_at")?,
    }))
}

/// Existence check plus indicator reference; `NotFound` when the studyflow is absent.
#[instrument(skip_all)]
pub async fn require_studyflow(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<StudyflowRef> {
    let row = sqlx::query("SELECT id, indicator_resource_id FROM studyflows WHERE id = ?")
        .bind(studyflow_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(PipelineError::not_found(format!(
            "studyflow {}",
            studyflow_id
        )));
    };
    Ok(StudyflowRef {
        id: row.try_get("id")?,
        indicator_resource_id: row.try_get("indicator_resource_id")?,
    })
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

fn resource_from_row(row: &SqliteRow) -> Result<Resource, sqlx::Error> {
    Ok(Resource {
        id: row.try_get("id")?,
        studyflow_id: row.try_get("studyflow_id")?,
        filename: row.try_get("filename")?,
        mime_type: row.try_get("mime_type")?,
        file_data: row.try_get("file_data")?,
        size_bytes: row.try_get("size_bytes")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Store an uploaded resource. When `is_indicator` is set the studyflow's
/// indicator reference is moved to the new resource in the same transaction.
/// The overview filename is reserved for [`insert_overview`].
#[instrument(skip_all, fields(filename = filename))]
pub async fn insert_resource(
    pool: &Pool,
    studyflow_id: Uuid,
    filename: &str,
    mime_type: &str,
    data: &[u8],
    is_indicator: bool,
) -> PipelineResult<Uuid> {
    if filename == OVERVIEW_FILENAME {
        return Err(PipelineError::processing(format!(
            "filename {} is reserved for the generated overview",
            filename
        )));
    }

    let mut tx = pool.begin().await?;
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM studyflows WHERE id = ?")
        .bind(studyflow_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(PipelineError::not_found(format!(
            "studyflow {}",
            studyflow_id
        )));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO resources (id, studyflow_id, filename, mime_type, file_data, size_bytes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(studyflow_id)
    .bind(filename)
    .bind(mime_type)
    .bind(data)
    .bind(data.len() as i64)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    if is_indicator {
        sqlx::query("UPDATE studyflows SET indicator_resource_id = ? WHERE id = ?")
            .bind(id)
            .bind(studyflow_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(id)
}

/// All resources of a studyflow in upload order, including the indicator and
/// any generated artifacts. Callers filter.
#[instrument(skip_all)]
pub async fn list_resources(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<Vec<Resource>> {
    let rows = sqlx::query(
        "SELECT id, studyflow_id, filename, mime_type, file_data, size_bytes, created_at \
         FROM resources WHERE studyflow_id = ? ORDER BY seq ASC",
    )
    .bind(studyflow_id)
    .fetch_all(pool)
    .await?;

    let resources = rows
        .iter()
        .map(resource_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(resources)
}

#[instrument(skip_all)]
pub async fn find_resource(pool: &Pool, resource_id: Uuid) -> PipelineResult<Option<Resource>> {
    let row = sqlx::query(
        "SELECT id, studyflow_id, filename, mime_type, file_data, size_bytes, created_at \
         FROM resources WHERE id = ?",
    )
    .bind(resource_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(resource_from_row).transpose()?)
}

#[instrument(skip_all)]
pub async fn find_resource_by_filename(
    pool: &Pool,
    studyflow_id: Uuid,
    filename: &str,
) -> PipelineResult<Option<Resource>> {
    let row = sqlx::query(
        "SELECT id, studyflow_id, filename, mime_type, file_data, size_bytes, created_at \
         FROM resources WHERE studyflow_id = ? AND filename = ? ORDER BY seq ASC LIMIT 1",
    )
    .bind(studyflow_id)
    .bind(filename)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(resource_from_row).transpose()?)
}

/// Persist the overview markdown under the reserved filename. The partial
/// unique index makes the first writer win; later writers get `AlreadyPresent`.
#[instrument(skip_all)]
pub async fn insert_overview(
    pool: &Pool,
    studyflow_id: Uuid,
    markdown: &str,
) -> PipelineResult<OverviewInsert> {
    let bytes = markdown.as_bytes();
    let mut tx = pool.begin().await?;
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM studyflows WHERE id = ?")
        .bind(studyflow_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(PipelineError::not_found(format!(
            "studyflow {}",
            studyflow_id
        )));
    }

    let id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO resources (id, studyflow_id, filename, mime_type, file_data, size_bytes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
    )
    .bind(id)
    .bind(studyflow_id)
    .bind(OVERVIEW_FILENAME)
    .bind(MARKDOWN_MIME)
    .bind(bytes)
    .bind(bytes.len() as i64)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    if result.rows_affected() == 0 {
        warn!(%studyflow_id, "overview already persisted by another writer");
        return Ok(OverviewInsert::AlreadyPresent);
    }
    Ok(OverviewInsert::Inserted(id))
}

// ---------------------------------------------------------------------------
// Indicator tags
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn register_indicator_tag(
    pool: &Pool,
    studyflow_id: Uuid,
    tag: &str,
) -> PipelineResult<i64> {
    require_studyflow(pool, studyflow_id).await?;
    let id: i64 = sqlx::query(
        "INSERT INTO indicator_tags (studyflow_id, tag, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(studyflow_id)
    .bind(tag.trim())
    .bind(Utc::now())
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(id)
}

/// Tags in registration order.
#[instrument(skip_all)]
pub async fn list_indicator_tags(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<Vec<String>> {
    let tags: Vec<String> =
        sqlx::query_scalar("SELECT tag FROM indicator_tags WHERE studyflow_id = ? ORDER BY id ASC")
            .bind(studyflow_id)
            .fetch_all(pool)
            .await?;
    Ok(tags)
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

fn question_from_row(row: &SqliteRow) -> Result<Question, sqlx::Error> {
    let type_str: String = row.try_get("question_type")?;
    let answered: i64 = row.try_get("answered")?;
    Ok(Question {
        id: row.try_get("id")?,
        studyflow_id: row.try_get("studyflow_id")?,
        question_type: QuestionType::parse_type(&type_str).unwrap_or(QuestionType::ShortAnswer),
        question: row.try_get("question")?,
        expected_answer: row.try_get("expected_answer")?,
        answers: row.try_get("answers")?,
        tags: row.try_get("tags")?,
        answered: answered != 0,
        user_answer: row.try_get("user_answer")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Attach a generated question set to a studyflow. Every row starts unanswered.
/// Either all questions become visible or none do.
#[instrument(skip_all, fields(count = questions.len()))]
pub async fn insert_questions(
    pool: &Pool,
    studyflow_id: Uuid,
    questions: &[NewQuestion],
) -> PipelineResult<Vec<Question>> {
    let mut tx = pool.begin().await?;
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM studyflows WHERE id = ?")
        .bind(studyflow_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(PipelineError::not_found(format!(
            "studyflow {}",
            studyflow_id
        )));
    }

    let mut saved = Vec::with_capacity(questions.len());
    for q in questions {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO questions (id, studyflow_id, question_type, question, expected_answer, answers, tags, answered, user_answer, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)",
        )
        .bind(id)
        .bind(studyflow_id)
        .bind(q.question_type.as_str())
        .bind(&q.question)
        .bind(&q.expected_answer)
        .bind(&q.answers)
        .bind(&q.tags)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        saved.push(Question {
            id,
            studyflow_id,
            question_type: q.question_type,
            question: q.question.clone(),
            expected_answer: q.expected_answer.clone(),
            answers: q.answers.clone(),
            tags: q.tags.clone(),
            answered: false,
            user_answer: None,
            created_at,
        });
    }

    tx.commit().await?;
    Ok(saved)
}

#[instrument(skip_all)]
pub async fn list_questions(pool: &Pool, studyflow_id: Uuid) -> PipelineResult<Vec<Question>> {
    let rows = sqlx::query(
        "SELECT id, studyflow_id, question_type, question, expected_answer, answers, tags, answered, user_answer, created_at \
         FROM questions WHERE studyflow_id = ? ORDER BY seq ASC",
    )
    .bind(studyflow_id)
    .fetch_all(pool)
    .await?;
    let questions = rows
        .iter()
        .map(question_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(questions)
}

/// Record the learner's answer and flip the question to answered.
#[instrument(skip_all)]
pub async fn submit_answer(pool: &Pool, question_id: Uuid, answer: &str) -> PipelineResult<Question> {
    let row = sqlx::query(
        "UPDATE questions SET answered = 1, user_answer = ? WHERE id = ? \
         RETURNING id, studyflow_id, question_type, question, expected_answer, answers, tags, answered, user_answer, created_at",
    )
    .bind(answer)
    .bind(question_id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(question_from_row(&row)?),
        None => Err(PipelineError::not_found(format!("question {}", question_id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_question(text: &str) -> NewQuestion {
        NewQuestion {
            question_type: QuestionType::TrueFalse,
            question: text.into(),
            expected_answer: "true".into(),
            answers: "[]".into(),
            tags: "biology".into(),
        }
    }

    #[test]
    fn prepare_sqlite_url_leaves_memory_urls() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn prepare_sqlite_url_requests_create_mode() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("s.db");
        let url = format!("sqlite://{}", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert!(prepared.ends_with("?mode=rwc"));
        assert!(path.parent().unwrap().exists());

        let with_query = prepare_sqlite_url(&format!("{}?mode=ro", url));
        assert!(with_query.ends_with("?mode=ro"));
    }

    #[tokio::test]
    async fn indicator_upload_updates_studyflow_reference() {
        let pool = setup_pool().await;
        let sid = create_studyflow(&pool, "Cells").await.unwrap();

        let plain = insert_resource(&pool, sid, "a.txt", "text/plain", b"alpha", false)
            .await
            .unwrap();
        assert_eq!(require_studyflow(&pool, sid).await.unwrap().indicator_resource_id, None);

        let ind = insert_resource(&pool, sid, "syllabus.txt", "text/plain", b"goals", true)
            .await
            .unwrap();
        let sf = find_studyflow(&pool, sid).await.unwrap().unwrap();
        assert_eq!(sf.indicator_resource_id, Some(ind));
        assert_eq!(sf.title, "Cells");

        let all = list_resources(&pool, sid).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![plain, ind]);
        assert_eq!(all[0].size_bytes, 5);
    }

    #[tokio::test]
    async fn insert_resource_rejects_unknown_studyflow() {
        let pool = setup_pool().await;
        let err = insert_resource(&pool, Uuid::new_v4(), "a.txt", "text/plain", b"x", false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn overview_insert_first_writer_wins() {
        let pool = setup_pool().await;
        let sid = create_studyflow(&pool, "Overview").await.unwrap();

        let first = insert_overview(&pool, sid, "# One").await.unwrap();
        assert!(matches!(first, OverviewInsert::Inserted(_)));
        let second = insert_overview(&pool, sid, "# Two").await.unwrap();
        assert_eq!(second, OverviewInsert::AlreadyPresent);

        let stored = find_resource_by_filename(&pool, sid, OVERVIEW_FILENAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.file_data, b"# One");
        assert_eq!(stored.mime_type, MARKDOWN_MIME);
        assert_eq!(stored.size_bytes, 5);

        let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources WHERE filename = ?")
            .bind(OVERVIEW_FILENAME)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(cnt, 1);
    }

    #[tokio::test]
    async fn uploads_cannot_take_the_overview_filename() {
        let pool = setup_pool().await;
        let sid = create_studyflow(&pool, "Reserved").await.unwrap();
        let err = insert_resource(&pool, sid, OVERVIEW_FILENAME, MARKDOWN_MIME, b"# Fake", false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceProcessing(_)));
        assert!(list_resources(&pool, sid).await.unwrap().is_empty());

        let stored = insert_overview(&pool, sid, "# Real").await.unwrap();
        assert!(matches!(stored, OverviewInsert::Inserted(_)));
    }

    #[tokio::test]
    async fn uploads_may_share_filenames() {
        let pool = setup_pool().await;
        let sid = create_studyflow(&pool, "Dupes").await.unwrap();
        insert_resource(&pool, sid, "notes.txt", "text/plain", b"1", false)
            .await
            .unwrap();
        insert_resource(&pool, sid, "notes.txt", "text/plain", b"2", false)
            .await
            .unwrap();
        assert_eq!(list_resources(&pool, sid).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tags_keep_registration_order() {
        let pool = setup_pool().await;
        let sid = create_studyflow(&pool, "Tags").await.unwrap();
        register_indicator_tag(&pool, sid, "mitosis").await.unwrap();
        register_indicator_tag(&pool, sid, " meiosis ").await.unwrap();
        assert_eq!(
            list_indicator_tags(&pool, sid).await.unwrap(),
            vec!["mitosis".to_string(), "meiosis".to_string()]
        );
    }

    #[tokio::test]
    async fn questions_insert_list_and_answer() {
        let pool = setup_pool().await;
        let sid = create_studyflow(&pool, "Quiz").await.unwrap();

        let saved = insert_questions(&pool, sid, &[sample_question("q1"), sample_question("q2")])
            .await
            .unwrap();
        assert_eq!(saved.len(), 2);

        let listed = list_questions(&pool, sid).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].question, "q1");
        assert!(listed.iter().all(|q| !q.answered && q.user_answer.is_none()));
        assert_eq!(listed[1].question_type, QuestionType::TrueFalse);

        let answered = submit_answer(&pool, listed[0].id, "false").await.unwrap();
        assert!(answered.answered);
        assert_eq!(answered.user_answer.as_deref(), Some("false"));

        let missing = submit_answer(&pool, Uuid::new_v4(), "x").await.unwrap_err();
        assert!(matches!(missing, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn insert_questions_for_missing_studyflow_writes_nothing() {
        let pool = setup_pool().await;
        let err = insert_questions(&pool, Uuid::new_v4(), &[sample_question("q")])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(cnt, 0);
    }
}
