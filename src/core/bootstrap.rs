use uuid::Uuid;

use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::UserRole;
use crate::repositories;

/// Seeds the first instructor account so a fresh deployment has someone who
/// can author exams. Skipped entirely when no password is configured.
pub(crate) async fn ensure_first_instructor(state: &AppState) -> anyhow::Result<()> {
    let admin = state.settings().admin();
    if admin.first_instructor_password.is_empty() {
        tracing::warn!("FIRST_INSTRUCTOR_PASSWORD not configured; skipping instructor creation");
        return Ok(());
    }

    let email = &admin.first_instructor_email;
    let now = primitive_now_utc();

    if let Some(user) = repositories::users::find_by_email(state.db(), email).await? {
        let password_matches =
            security::verify_password(&admin.first_instructor_password, &user.hashed_password)
                .unwrap_or(false);

        let needs_update =
            !password_matches || user.role != UserRole::Instructor || !user.is_active;
        if !needs_update {
            tracing::info!("Default instructor already up to date");
            return Ok(());
        }

        let hashed_password = if password_matches {
            user.hashed_password
        } else {
            security::hash_password(&admin.first_instructor_password)?
        };

        sqlx::query(
            "UPDATE users
             SET hashed_password = $1, role = $2, is_active = TRUE, updated_at = $3
             WHERE id = $4",
        )
        .bind(hashed_password)
        .bind(UserRole::Instructor)
        .bind(now)
        .bind(user.id)
        .execute(state.db())
        .await?;

        tracing::info!("Updated default instructor {email}");
        return Ok(());
    }

    let hashed_password = security::hash_password(&admin.first_instructor_password)?;
    repositories::users::create(
        state.db(),
        repositories::users::CreateUser {
            id: &Uuid::new_v4().to_string(),
            email,
            hashed_password,
            full_name: "Default Instructor",
            role: UserRole::Instructor,
            is_active: true,
            created_at: now,
            updated_at: now,
        },
    )
    .await?;

    tracing::info!("Created default instructor {email}");
    Ok(())
}
