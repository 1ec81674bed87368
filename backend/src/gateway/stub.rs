use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use url::Url;

/// A throwaway model backend listening on an ephemeral local port.
pub struct StubBackend {
    pub url: Url,
    handle: ServerHandle,
}

impl StubBackend {
    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

/// Must be called from inside an actix system (e.g. `#[actix_web::test]`).
pub fn spawn_backend<F>(routes: F) -> StubBackend
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let server = HttpServer::new(move || App::new().configure(routes.clone()))
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .expect("bind stub backend");
    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);

    StubBackend {
        url: Url::parse(&format!("http://{}", addr)).expect("stub url"),
        handle,
    }
}
