use crate::error::SwapError;
use log::error;
use serde::Serialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

/// Error carried through warp's rejection system and rendered as
/// `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiProblem {
    pub status: StatusCode,
    pub message: String,
}

impl warp::reject::Reject for ApiProblem {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl From<SwapError> for ApiProblem {
    fn from(err: SwapError) -> Self {
        let status = match &err {
            SwapError::Validation(_) | SwapError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            SwapError::NotFound(_) => StatusCode::NOT_FOUND,
            SwapError::AlreadyExists(_)
            | SwapError::HashlockChanged(_)
            | SwapError::Expired { .. } => StatusCode::CONFLICT,
            SwapError::Ledger(_) => StatusCode::BAD_GATEWAY,
            SwapError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("[Api] {}", err);
        }
        ApiProblem {
            status,
            message: err.to_string(),
        }
    }
}

pub fn reject(err: SwapError) -> Rejection {
    warp::reject::custom(ApiProblem::from(err))
}

fn reply(status: StatusCode, message: &str) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&ErrorBody { error: message }), status).into_response()
}

pub async fn unpack_problem(rejection: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(problem) = rejection.find::<ApiProblem>() {
        return Ok(reply(problem.status, &problem.message));
    }
    if rejection.is_not_found() {
        return Ok(reply(StatusCode::NOT_FOUND, "route not found"));
    }
    if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(reply(StatusCode::BAD_REQUEST, &format!("invalid body: {}", err)));
    }
    if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        return Ok(reply(StatusCode::BAD_REQUEST, &err.to_string()));
    }
    if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(reply(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }
    if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        return Ok(reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json"));
    }
    error!("[Api] Unhandled rejection: {:?}", rejection);
    Ok(reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
}
