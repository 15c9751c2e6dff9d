// src/db.rs
//
// Query layer. One function per read or write the handlers need; relations
// are loaded explicitly, never implicitly.

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::{Course, CourseProgress, CourseRating, Purchase, PurchaseStatus, Role, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at, updated_at";
const COURSE_COLUMNS: &str = "id, course_title, course_description, course_thumbnail, \
     course_price, discount, is_published, educator_id, created_at, updated_at";
const PURCHASE_COLUMNS: &str =
    "id, course_id, user_id, amount, status, payment_method, created_at, updated_at";

fn decode_err(column: &str, msg: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: msg.into(),
    }
}

fn user_from_row(r: &PgRow) -> Result<User, sqlx::Error> {
    let role: String = r.try_get("role")?;
    Ok(User {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        email: r.try_get("email")?,
        password_hash: r.try_get("password_hash")?,
        role: role.parse::<Role>().map_err(|e| decode_err("role", e))?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn course_from_row(r: &PgRow) -> Result<Course, sqlx::Error> {
    Ok(Course {
        id: r.try_get("id")?,
        course_title: r.try_get("course_title")?,
        course_description: r.try_get("course_description")?,
        course_thumbnail: r.try_get("course_thumbnail")?,
        course_price: r.try_get("course_price")?,
        discount: r.try_get("discount")?,
        is_published: r.try_get("is_published")?,
        educator_id: r.try_get("educator_id")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn purchase_from_row(r: &PgRow) -> Result<Purchase, sqlx::Error> {
    let status: String = r.try_get("status")?;
    Ok(Purchase {
        id: r.try_get("id")?,
        course_id: r.try_get("course_id")?,
        user_id: r.try_get("user_id")?,
        amount: r.try_get("amount")?,
        status: status
            .parse::<PurchaseStatus>()
            .map_err(|e| decode_err("status", e))?,
        payment_method: r.try_get("payment_method")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

// ---- users ----

pub async fn create_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"INSERT INTO users (name, email, password_hash)
           VALUES ($1, $2, $3)
           RETURNING {USER_COLUMNS}"#
    ))
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    user_from_row(&row)
}

pub async fn get_user(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
}

pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
        .bind(email)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
}

/// Returns the updated user, or `None` when it does not exist.
pub async fn set_user_name(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query(&format!(
        r#"UPDATE users SET name = $1, updated_at = NOW()
           WHERE id = $2
           RETURNING {USER_COLUMNS}"#
    ))
    .bind(name)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .as_ref()
    .map(user_from_row)
    .transpose()
}

/// Returns `false` when the user does not exist.
pub async fn set_user_role(pool: &PgPool, user_id: Uuid, role: Role) -> Result<bool, sqlx::Error> {
    let res = sqlx::query("UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2")
        .bind(role.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(res.rows_affected() == 1)
}

// ---- catalog ----

pub async fn get_course(
    conn: &mut PgConnection,
    course_id: Uuid,
) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"))
        .bind(course_id)
        .fetch_optional(conn)
        .await?
        .as_ref()
        .map(course_from_row)
        .transpose()
}

pub struct NewCourse<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub thumbnail: Option<&'a str>,
    pub price: Decimal,
    pub discount: Decimal,
    pub educator_id: Uuid,
}

pub async fn insert_course(
    conn: &mut PgConnection,
    course: &NewCourse<'_>,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO courses
               (course_title, course_description, course_thumbnail, course_price, discount,
                is_published, educator_id)
           VALUES ($1, $2, $3, $4, $5, true, $6)
           RETURNING id"#,
    )
    .bind(course.title)
    .bind(course.description)
    .bind(course.thumbnail)
    .bind(course.price)
    .bind(course.discount)
    .bind(course.educator_id)
    .fetch_one(conn)
    .await?;

    Ok(row.get("id"))
}

pub async fn insert_chapter(
    conn: &mut PgConnection,
    course_id: Uuid,
    order: i32,
    title: &str,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO chapters (course_id, chapter_order, chapter_title)
           VALUES ($1, $2, $3)
           RETURNING id"#,
    )
    .bind(course_id)
    .bind(order)
    .bind(title)
    .fetch_one(conn)
    .await?;

    Ok(row.get("id"))
}

pub struct NewLecture<'a> {
    pub title: &'a str,
    pub duration: i32,
    pub url: &'a str,
    pub is_preview_free: bool,
    pub order: i32,
}

pub async fn insert_lecture(
    conn: &mut PgConnection,
    chapter_id: Uuid,
    lecture: &NewLecture<'_>,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO lectures
               (chapter_id, lecture_title, lecture_duration, lecture_url, is_preview_free,
                lecture_order)
           VALUES ($1, $2, $3, $4, $5, $6)
           RETURNING id"#,
    )
    .bind(chapter_id)
    .bind(lecture.title)
    .bind(lecture.duration)
    .bind(lecture.url)
    .bind(lecture.is_preview_free)
    .bind(lecture.order)
    .fetch_one(conn)
    .await?;

    Ok(row.get("id"))
}

// ---- purchase ledger ----

pub async fn insert_pending_purchase(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
    amount: Decimal,
) -> Result<Purchase, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"INSERT INTO purchases (user_id, course_id, amount, status)
           VALUES ($1, $2, $3, 'pending')
           RETURNING {PURCHASE_COLUMNS}"#
    ))
    .bind(user_id)
    .bind(course_id)
    .bind(amount)
    .fetch_one(pool)
    .await?;

    purchase_from_row(&row)
}

pub async fn get_purchase(
    conn: &mut PgConnection,
    purchase_id: Uuid,
) -> Result<Option<Purchase>, sqlx::Error> {
    sqlx::query(&format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"))
        .bind(purchase_id)
        .fetch_optional(conn)
        .await?
        .as_ref()
        .map(purchase_from_row)
        .transpose()
}

/// Serializes ledger work on one (user, course) pair until the surrounding
/// transaction ends.
pub async fn lock_purchase_pair(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("purchase:{user_id}:{course_id}"))
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn find_completed_purchase(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id FROM purchases
           WHERE user_id = $1 AND course_id = $2 AND status = 'completed'
           LIMIT 1"#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|r| r.get("id")))
}

pub async fn latest_pending_purchase(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id FROM purchases
           WHERE user_id = $1 AND course_id = $2 AND status = 'pending'
           ORDER BY created_at DESC
           LIMIT 1
           FOR UPDATE"#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|r| r.get("id")))
}

/// Flips a pending row to completed. Returns `false` if the row was not pending.
pub async fn complete_purchase(
    conn: &mut PgConnection,
    purchase_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE purchases
           SET status = 'completed', updated_at = NOW()
           WHERE id = $1 AND status = 'pending'"#,
    )
    .bind(purchase_id)
    .execute(conn)
    .await?;

    Ok(res.rows_affected() == 1)
}

pub async fn insert_completed_purchase(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
    amount: Decimal,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO purchases (user_id, course_id, amount, status)
           VALUES ($1, $2, $3, 'completed')
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(amount)
    .fetch_one(conn)
    .await?;

    Ok(row.get("id"))
}

// ---- enrollment ----

/// Idempotent. Returns `true` only when a new enrollment row was written.
pub async fn enroll_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"INSERT INTO user_courses (user_id, course_id)
           VALUES ($1, $2)
           ON CONFLICT (user_id, course_id) DO NOTHING"#,
    )
    .bind(user_id)
    .bind(course_id)
    .execute(conn)
    .await?;

    Ok(res.rows_affected() == 1)
}

pub async fn is_enrolled(pool: &PgPool, user_id: Uuid, course_id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT EXISTS (
               SELECT 1 FROM user_courses WHERE user_id = $1 AND course_id = $2
           ) AS enrolled"#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    Ok(row.get("enrolled"))
}

// ---- progress & ratings ----

pub async fn get_course_progress(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<CourseProgress>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT user_id, course_id, lecture_completed, completed
           FROM course_progresses
           WHERE user_id = $1 AND course_id = $2"#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| CourseProgress {
        user_id: r.get("user_id"),
        course_id: r.get("course_id"),
        lecture_completed: r.get("lecture_completed"),
        completed: r.get("completed"),
    }))
}

/// Adds `lecture_id` to the user's completed set for the course.
/// Returns `false` when the lecture was already in the set.
pub async fn mark_lecture_completed(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
    lecture_id: &str,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let added = sqlx::query(
        r#"INSERT INTO course_progresses (user_id, course_id, lecture_completed)
           VALUES ($1, $2, ARRAY[$3::text])
           ON CONFLICT (user_id, course_id) DO UPDATE
           SET lecture_completed = array_append(course_progresses.lecture_completed, $3::text),
               updated_at = NOW()
           WHERE NOT ($3::text = ANY(course_progresses.lecture_completed))
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(lecture_id)
    .fetch_optional(&mut *tx)
    .await?
    .is_some();

    if added {
        // completed once every lecture of the course is in the set
        sqlx::query(
            r#"UPDATE course_progresses p
               SET completed = EXISTS (
                       SELECT 1 FROM lectures l JOIN chapters c ON c.id = l.chapter_id
                       WHERE c.course_id = p.course_id
                   )
                   AND NOT EXISTS (
                       SELECT 1 FROM lectures l JOIN chapters c ON c.id = l.chapter_id
                       WHERE c.course_id = p.course_id
                         AND NOT (l.id::text = ANY(p.lecture_completed))
                   )
               WHERE p.user_id = $1 AND p.course_id = $2"#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(added)
}

/// One rating per (user, course); a resubmission replaces the value.
pub async fn upsert_course_rating(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
    rating: i16,
) -> Result<CourseRating, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO course_ratings (user_id, course_id, rating)
           VALUES ($1, $2, $3)
           ON CONFLICT (user_id, course_id)
           DO UPDATE SET rating = EXCLUDED.rating, updated_at = NOW()
           RETURNING id, user_id, course_id, rating, created_at, updated_at"#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(rating)
    .fetch_one(pool)
    .await?;

    Ok(CourseRating {
        id: row.get("id"),
        user_id: row.get("user_id"),
        course_id: row.get("course_id"),
        rating: row.get("rating"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
