use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(User, "user", {
    email: String,
    api_key: Option<String>
});

impl User {
    pub async fn create_new(email: String, db: &SurrealDbClient) -> Result<Self, AppError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::Validation("Email is required".into()));
        }

        if Self::find_by_email(&email, db).await?.is_some() {
            return Err(AppError::Validation(format!(
                "A user with email {email} already exists"
            )));
        }

        let now = Utc::now();
        let user = Self {
            id: Uuid::new_v4().to_string(),
            email,
            api_key: Some(Self::generate_api_key()),
            created_at: now,
            updated_at: now,
        };

        db.store_item(user.clone())
            .await?
            .ok_or_else(|| AppError::InternalError("User was not stored".into()))
    }

    pub async fn find_by_email(
        email: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE api_key = $api_key LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    fn generate_api_key() -> String {
        format!("sk_{}", Uuid::new_v4().to_string().replace('-', ""))
    }
}
