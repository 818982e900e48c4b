use crate::api::problem::{self, reject};
use crate::api::{HashlockRequest, StatusUpdateRequest, SwapService, TransactionsQuery};
use crate::data_structures::SwapTerms;
use std::sync::Arc;
use warp::filters::BoxedFilter;
use warp::{Filter, Rejection, Reply};

pub const PATH: &str = "api";

pub fn create(service: Arc<SwapService>) -> BoxedFilter<(impl Reply,)> {
    let swap = warp::path(PATH).and(warp::path("swap"));
    let service = warp::any().map(move || Arc::clone(&service));

    let generate_secret = swap
        .and(warp::path("generate-secret"))
        .and(warp::path::end())
        .and(warp::post())
        .and(service.clone())
        .and_then(generate_secret);

    let generate_hashlock = swap
        .and(warp::path("generate-hashlock"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(service.clone())
        .and_then(generate_hashlock);

    let store_swap = swap
        .and(warp::path("store"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(service.clone())
        .and_then(store_swap);

    let process_pending = swap
        .and(warp::path("process-pending"))
        .and(warp::path::end())
        .and(warp::post())
        .and(service.clone())
        .and_then(process_pending);

    // Must be matched before the `{swapId}` route.
    let get_transactions = swap
        .and(warp::path("transactions"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<TransactionsQuery>())
        .and(service.clone())
        .and_then(get_transactions);

    let get_swap = swap
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(service.clone())
        .and_then(get_swap);

    let update_status = swap
        .and(warp::path::param::<String>())
        .and(warp::path("status"))
        .and(warp::path::end())
        .and(warp::patch())
        .and(warp::body::json())
        .and(service.clone())
        .and_then(update_status);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(service)
        .and_then(health);

    generate_secret
        .or(generate_hashlock)
        .or(store_swap)
        .or(process_pending)
        .or(get_transactions)
        .or(get_swap)
        .or(update_status)
        .or(health)
        .recover(problem::unpack_problem)
        .with(warp::log("http"))
        .boxed()
}

async fn generate_secret(service: Arc<SwapService>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&service.generate_secret()))
}

async fn generate_hashlock(
    request: HashlockRequest,
    service: Arc<SwapService>,
) -> Result<impl Reply, Rejection> {
    service
        .generate_hashlock(request)
        .map(|body| warp::reply::json(&body))
        .map_err(reject)
}

async fn store_swap(terms: SwapTerms, service: Arc<SwapService>) -> Result<impl Reply, Rejection> {
    service
        .store_swap(terms)
        .map(|body| warp::reply::json(&body))
        .map_err(reject)
}

async fn get_swap(swap_id: String, service: Arc<SwapService>) -> Result<impl Reply, Rejection> {
    service
        .get_swap(&swap_id)
        .map(|view| warp::reply::json(&view))
        .map_err(reject)
}

async fn get_transactions(
    query: TransactionsQuery,
    service: Arc<SwapService>,
) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&service.get_transactions(&query)))
}

async fn update_status(
    swap_id: String,
    request: StatusUpdateRequest,
    service: Arc<SwapService>,
) -> Result<impl Reply, Rejection> {
    service
        .update_swap_status(&swap_id, request)
        .await
        .map(|body| warp::reply::json(&body))
        .map_err(reject)
}

async fn process_pending(service: Arc<SwapService>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&service.process_pending().await))
}

async fn health(service: Arc<SwapService>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&service.health()))
}
