use std::fmt;

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::SqlitePool;
use tracing::instrument;
use validator::{Validate, ValidationError};

use super::{GenericRepository, RepositoryError};

pub const NAME_MAX_LENGTH: u64 = 100;

pub type ProductId = i64;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    #[error("price {0} does not fit in decimal(18,2)")]
    OutOfRange(Decimal),
}

/// Monetary amount with two fixed decimal places (`decimal(18,2)`).
///
/// The wrapped value always has a scale of 2 and at most 18 significant
/// digits. It is persisted as whole cents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct Price(Decimal);

impl Price {
    pub const SCALE: u32 = 2;

    const MAX_CENTS: i64 = 999_999_999_999_999_999;

    pub fn from_cents(cents: i64) -> Result<Self, PriceError> {
        let value = Decimal::new(cents, Self::SCALE);
        if cents.unsigned_abs() > Self::MAX_CENTS.unsigned_abs() {
            return Err(PriceError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Rounds `value` to the nearest cent, halves away from zero.
    pub fn from_decimal(value: Decimal) -> Result<Self, PriceError> {
        value
            .round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero)
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.to_i64())
            .ok_or(PriceError::OutOfRange(value))
            .and_then(Self::from_cents)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn cents(self) -> i64 {
        // Scale is pinned to 2 and the magnitude to MAX_CENTS.
        self.0.mantissa() as i64
    }

    #[must_use]
    pub const fn as_decimal(self) -> Decimal {
        self.0
    }
}

impl TryFrom<i64> for Price {
    type Error = PriceError;

    fn try_from(cents: i64) -> Result<Self, Self::Error> {
        Self::from_cents(cents)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::arbitrary_precision::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = rust_decimal::serde::arbitrary_precision::deserialize(deserializer)?;
        Self::from_decimal(value).map_err(D::Error::custom)
    }
}

fn non_negative_price(price: &Price) -> Result<(), ValidationError> {
    if price.as_decimal() < Decimal::ZERO {
        return Err(ValidationError::new("negative_price"));
    }
    Ok(())
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Validate, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Product {
    pub id: ProductId,
    #[validate(length(min = 1, max = NAME_MAX_LENGTH))]
    pub name: String,
    #[sqlx(rename = "price_cents", try_from = "i64")]
    #[validate(custom(function = "non_negative_price"))]
    pub price: Price,
    #[validate(range(min = 0))]
    pub stock: i64,
}

/// A product that has not been stored yet.
#[derive(Deserialize, Validate, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct NewProduct {
    #[validate(length(min = 1, max = NAME_MAX_LENGTH))]
    pub name: String,
    #[validate(custom(function = "non_negative_price"))]
    pub price: Price,
    #[validate(range(min = 0))]
    pub stock: i64,
}

/// Product-specific queries on top of the generic CRUD contract.
pub trait ProductQueries: GenericRepository<Product, ProductId> {
    /// Up to `count` products, most expensive first, ties by ascending id.
    fn top_price_products(
        &self,
        count: i64,
    ) -> impl Future<Output = Result<Vec<Product>, RepositoryError>> + Send;
}

#[derive(Debug, Clone)]
#[must_use]
pub struct ProductRepository {
    pub(super) connection: SqlitePool,
}

impl GenericRepository<Product, ProductId> for ProductRepository {
    type Draft = NewProduct;

    #[instrument(skip(self), err(Debug))]
    async fn get_by_id(&self, key: ProductId) -> Result<Product, RepositoryError> {
        sqlx::query_as::<_, Product>(
            "SELECT id, name, price_cents, stock FROM products WHERE id = ?",
        )
        .bind(key)
        .fetch_optional(&self.connection)
        .await?
        .ok_or(RepositoryError::NotFound)
    }

    fn get_all(&self) -> BoxStream<'_, Result<Product, RepositoryError>> {
        tracing::trace!("Streaming all products");
        sqlx::query_as::<_, Product>("SELECT id, name, price_cents, stock FROM products ORDER BY id")
            .fetch(&self.connection)
            .map_err(RepositoryError::from)
            .boxed()
    }

    #[instrument(skip(self), err(Debug))]
    async fn add(&self, draft: NewProduct) -> Result<Product, RepositoryError> {
        draft
            .validate()
            .inspect_err(|error| tracing::debug!(?error, "Rejecting invalid product"))?;

        let product = sqlx::query_as::<_, Product>(
            r"
                INSERT INTO products (name, price_cents, stock)
                VALUES (?, ?, ?)
                RETURNING id, name, price_cents, stock
            ",
        )
        .bind(&draft.name)
        .bind(draft.price.cents())
        .bind(draft.stock)
        .fetch_one(&self.connection)
        .await?;

        tracing::debug!(product.id = product.id, "Stored new product");
        Ok(product)
    }

    #[instrument(skip(self), fields(product.id = entity.id), err(Debug))]
    async fn update(&self, entity: Product) -> Result<(), RepositoryError> {
        entity
            .validate()
            .inspect_err(|error| tracing::debug!(?error, "Rejecting invalid product"))?;

        let result =
            sqlx::query("UPDATE products SET name = ?, price_cents = ?, stock = ? WHERE id = ?")
                .bind(&entity.name)
                .bind(entity.price.cents())
                .bind(entity.stock)
                .bind(entity.id)
                .execute(&self.connection)
                .await?;

        match result.rows_affected() {
            0 => Err(RepositoryError::NotFound),
            _ => Ok(()),
        }
    }

    #[instrument(skip(self), err(Debug))]
    async fn delete(&self, key: ProductId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(key)
            .execute(&self.connection)
            .await?;

        match result.rows_affected() {
            0 => Err(RepositoryError::NotFound),
            _ => Ok(()),
        }
    }
}

impl ProductQueries for ProductRepository {
    #[instrument(skip(self), err(Debug))]
    async fn top_price_products(&self, count: i64) -> Result<Vec<Product>, RepositoryError> {
        if count <= 0 {
            return Err(RepositoryError::InvalidArgument(format!(
                "count must be positive, got {count}"
            )));
        }

        let products = sqlx::query_as::<_, Product>(
            r"
                SELECT id, name, price_cents, stock FROM products
                ORDER BY price_cents DESC, id ASC
                LIMIT ?
            ",
        )
        .bind(count)
        .fetch_all(&self.connection)
        .await?;

        tracing::trace!(returned = products.len(), "Fetched top priced products");
        Ok(products)
    }
}
