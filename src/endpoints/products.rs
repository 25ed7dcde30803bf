use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, debug_handler};
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::bus::MessagePublisher;
use crate::repository::product::{NewProduct, Price, Product, ProductId, ProductQueries};
use crate::repository::{GenericRepository, RepositoryError};
use crate::state::SharedState;

#[derive(Deserialize, Debug)]
#[must_use]
pub struct ProductChanges {
    pub name: String,
    pub price: Price,
    pub stock: i64,
}

#[instrument(skip_all, err(Debug))]
#[debug_handler]
pub async fn list(State(state): State<SharedState>) -> Result<Json<Vec<Product>>, RepositoryError> {
    let products: Vec<Product> = state.repository.products.get_all().try_collect().await?;
    tracing::debug!(count = products.len(), "Returning list of products via API");
    Ok(Json(products))
}

#[instrument(skip(state), err(Debug))]
#[debug_handler]
pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<ProductId>,
) -> Result<Json<Product>, RepositoryError> {
    state.repository.products.get_by_id(id).await.map(Json)
}

/// Stores the product, then announces it on the bus so connected clients hear about it.
#[instrument(skip_all, fields(name = draft.name), err(Debug))]
#[debug_handler]
pub async fn create(
    State(state): State<SharedState>,
    Json(draft): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), RepositoryError> {
    let product = state.repository.products.add(draft).await?;

    let announcement = json!({ "kind": "product-created", "product": &product });
    let _ = state
        .bus
        .publish(&state.bus_topic, announcement)
        .inspect_err(|error| tracing::warn!(?error, "Product created but not announced"));

    Ok((StatusCode::CREATED, Json(product)))
}

#[instrument(skip(state, changes), err(Debug))]
#[debug_handler]
pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<ProductId>,
    Json(changes): Json<ProductChanges>,
) -> Result<StatusCode, RepositoryError> {
    let product = Product {
        id,
        name: changes.name,
        price: changes.price,
        stock: changes.stock,
    };
    state.repository.products.update(product).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state), err(Debug))]
#[debug_handler]
pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<ProductId>,
) -> Result<StatusCode, RepositoryError> {
    state.repository.products.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state), err(Debug))]
#[debug_handler]
pub async fn top(
    State(state): State<SharedState>,
    Path(count): Path<i64>,
) -> Result<Json<Vec<Product>>, RepositoryError> {
    state
        .repository
        .products
        .top_price_products(count)
        .await
        .map(Json)
}

impl IntoResponse for RepositoryError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::Validation(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(errors)).into_response()
            }
            Self::InvalidArgument(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
            Self::TransportUnavailable(error) => {
                tracing::error!(?error, "Storage engine unavailable");
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
        }
    }
}
