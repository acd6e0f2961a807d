mod environments;
mod handlers;
mod middleware;
mod orchestrator;
mod routes;
mod tracks;

pub use routes::create_router;
