use crate::{
    entities::discount_code::{self, Entity as DiscountCodeEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Generation gives up after this many collisions. At the default length the
/// chance of ever getting here is astronomically small; the bound exists so
/// the loop provably terminates.
const MAX_CODE_ATTEMPTS: usize = 20;

const DEFAULT_CODE_LENGTH: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDiscountCodeInput {
    pub sales_rep_id: Uuid,
    /// When absent, a code is generated and retried until unique
    pub code: Option<String>,
    pub discount: Decimal,
    pub commission: Decimal,
}

/// Service for sales-attribution discount codes.
#[derive(Clone)]
pub struct DiscountCodeService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    code_length: usize,
}

impl DiscountCodeService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            event_sender,
            code_length: DEFAULT_CODE_LENGTH,
        }
    }

    /// Overrides the generated-code length.
    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length;
        self
    }

    /// Draws `length` characters uniformly at random from an alphabet of
    /// uppercase letters, extended with lowercase letters and digits per the
    /// flags.
    pub fn generate_code(length: usize, include_numbers: bool, all_uppercase: bool) -> String {
        let mut alphabet: Vec<char> = ('A'..='Z').collect();
        if !all_uppercase {
            alphabet.extend('a'..='z');
        }
        if include_numbers {
            alphabet.extend('0'..='9');
        }

        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect()
    }

    /// Creates a discount code. A supplied code that collides is a conflict;
    /// a generated one is retried (bounded) until it does not collide, and a
    /// lost probe-then-insert race counts as one failed attempt.
    #[instrument(skip(self, input), fields(sales_rep_id = %input.sales_rep_id))]
    pub async fn create(
        &self,
        mut input: CreateDiscountCodeInput,
    ) -> Result<discount_code::Model, ServiceError> {
        validate_percentage("discount", input.discount)?;
        validate_percentage("commission", input.commission)?;

        let model = if let Some(code) = input.code.take() {
            if code.trim().is_empty() {
                return Err(ServiceError::ValidationError(
                    "Code must not be blank".to_string(),
                ));
            }
            if self.code_exists(&code).await? {
                return Err(ServiceError::Conflict(format!(
                    "Discount code {} already exists",
                    code
                )));
            }
            self.try_insert(&input, code).await?.ok_or_else(|| {
                ServiceError::Conflict("Discount code already exists".to_string())
            })?
        } else {
            self.create_with_generated_code(&input).await?
        };

        self.event_sender
            .send_or_log(Event::DiscountCodeCreated(model.id))
            .await;

        info!(code_id = %model.id, "Discount code created");
        Ok(model)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<discount_code::Model>, ServiceError> {
        Ok(DiscountCodeEntity::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_code(
        &self,
        code: &str,
    ) -> Result<Option<discount_code::Model>, ServiceError> {
        Ok(DiscountCodeEntity::find()
            .filter(discount_code::Column::Code.eq(code))
            .one(&*self.db)
            .await?)
    }

    pub async fn list(&self) -> Result<Vec<discount_code::Model>, ServiceError> {
        Ok(DiscountCodeEntity::find().all(&*self.db).await?)
    }

    async fn create_with_generated_code(
        &self,
        input: &CreateDiscountCodeInput,
    ) -> Result<discount_code::Model, ServiceError> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = Self::generate_code(self.code_length, false, true);

            if self.code_exists(&code).await? {
                warn!(attempt, "Generated discount code collided; retrying");
                continue;
            }

            // A concurrent creator may have claimed the code between the
            // probe and the insert; the unique index decides, and a loss is
            // just another attempt.
            match self.try_insert(input, code).await? {
                Some(model) => return Ok(model),
                None => {
                    warn!(attempt, "Discount code insert lost a race; retrying");
                    continue;
                }
            }
        }

        Err(ServiceError::InternalError(format!(
            "Could not find an unused discount code in {} attempts",
            MAX_CODE_ATTEMPTS
        )))
    }

    /// Inserts, returning `None` on a code-uniqueness violation.
    async fn try_insert(
        &self,
        input: &CreateDiscountCodeInput,
        code: String,
    ) -> Result<Option<discount_code::Model>, ServiceError> {
        let now = Utc::now();
        let model = discount_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            sales_rep_id: Set(input.sales_rep_id),
            code: Set(code),
            discount: Set(input.discount),
            commission: Set(input.commission),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match model.insert(&*self.db).await {
            Ok(model) => Ok(Some(model)),
            Err(e)
                if matches!(
                    e.sql_err(),
                    Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(ServiceError::DatabaseError(e)),
        }
    }

    async fn code_exists(&self, code: &str) -> Result<bool, ServiceError> {
        Ok(self.find_by_code(code).await?.is_some())
    }
}

fn validate_percentage(field: &str, value: Decimal) -> Result<(), ServiceError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(ServiceError::ValidationError(format!(
            "{} must be between 0 and 100",
            field
        )));
    }
    Ok(())
}
