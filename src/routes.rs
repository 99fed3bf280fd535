use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::AppError;
use crate::gpio::{GpioInput, SensorRuntime, StateChange};

pub struct AppState<B: GpioInput> {
    pub runtime: Arc<SensorRuntime<B>>,
}

impl<B: GpioInput> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
        }
    }
}

#[derive(Deserialize, Default)]
struct ChangesQuery {
    limit: Option<usize>,
}

async fn handle_change_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<StateChange>,
    port_filter: Option<u32>,
) {
    let mut changes = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            change = changes.next() => {
                let Some(change) = change else { break; };

                match change {
                    Ok(change) => {
                        if port_filter.as_ref().map(|p| *p == change.port).unwrap_or(true) {
                            if let Ok(text) = serde_json::to_string(&change) {
                                if session.text(text).await.is_err() {
                                    warn!("WebSocket client disconnected");
                                    break;
                                }
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        if session.text(AppError::Gpio(format!("Change stream lagged by {n} messages")).to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioInput + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/sensors")
                    .route(web::get().to(list_sensors::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/sensors/events")
                    .route(web::get().to(changes_ws_all::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/sensor/{port}")
                    .route(web::get().to(sensor_descriptor::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/sensor/{port}/state")
                    .route(web::get().to(get_state::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/sensor/{port}/refresh")
                    .route(web::post().to(refresh_sensor::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/sensor/{port}/change")
                    .route(web::get().to(get_last_change::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/sensor/{port}/changes")
                    .route(web::get().to(get_changes::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_sensors<B: GpioInput + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let sensors = state.runtime.list_sensors().await;

    Ok(web::Json(sensors))
}

async fn sensor_descriptor<B: GpioInput + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;
    let desc = state.runtime.get_descriptor(port).await?;

    Ok(web::Json(desc))
}

async fn get_state<B: GpioInput + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;
    let sensor_state = state.runtime.get_state(port).await?;

    Ok(web::Json(sensor_state))
}

async fn refresh_sensor<B: GpioInput + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;
    let change = state.runtime.refresh_sensor(port).await?;

    Ok(web::Json(change))
}

async fn get_last_change<B: GpioInput + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;

    let last = state.runtime.get_last_change(port).await?;

    match last {
        Some(change) => Ok(HttpResponse::Ok().json(change)),
        None => Ok(HttpResponse::Ok().finish()),
    }
}

async fn get_changes<B: GpioInput + 'static>(
    req: HttpRequest,
    query: web::Query<ChangesQuery>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;

    let changes = state.runtime.get_changes(port, query.limit).await?;

    Ok(web::Json(changes))
}

async fn changes_ws_all<B: GpioInput + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let rx = state.runtime.subscribe_changes();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::Gpio(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_change_websocket(session, client_stream, rx, None).await;
    });

    Ok(response)
}

fn parse_port(req: &HttpRequest) -> Result<u32, AppError> {
    let port = req
        .match_info()
        .get("port")
        .ok_or_else(|| AppError::InvalidValue("Missing port".into()))?;
    let port = port
        .parse::<u32>()
        .map_err(|_| AppError::InvalidValue("Invalid port".into()))?;

    Ok(port)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
