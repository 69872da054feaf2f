use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CONTENT_TYPE, ORIGIN};
use http::{HeaderValue, Method};
use micro_middleware::cors::{CorsOptions, cors};
use micro_middleware::encoding::{CompressionOptions, compression};
use micro_middleware::stream::BufferSink;
use micro_middleware::transcode::{TranscoderOptions, transcoder};
use micro_middleware::{Cookie, Flow, Pipeline, Request, Response, SameSite, fn_middleware};
use serde_json::json;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cors_options: CorsOptions = match serde_json::from_value(json!({
        "allowOrigins": ["https://app.example.com", "^https://[a-z]+\\.preview\\.example\\.com$"],
        "allowCredentials": true,
        "exposeHeaders": ["x-request-id"]
    })) {
        Ok(options) => options,
        Err(e) => {
            error!(cause = %e, "invalid cors options");
            return;
        }
    };

    let pipeline = Pipeline::builder()
        .add_last(cors(cors_options))
        .add_last(compression(CompressionOptions::default()))
        .add_last(transcoder(TranscoderOptions { set_json_content_type: true, ..TranscoderOptions::default() }))
        .add_last(fn_middleware("hello", |req: &Request, res: &mut Response| {
            let mut session = Cookie::new("session", "42");
            session.http_only = true;
            session.same_site = Some(SameSite::Lax);
            res.head_mut().set_cookie(&session)?;
            res.head_mut().insert_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

            res.write(json!({ "path": req.uri().path(), "greeting": "hello" }))?;
            res.end()?;
            Ok(Flow::End)
        }))
        .build();

    for method in [Method::OPTIONS, Method::GET] {
        let req = http::Request::builder()
            .method(method.clone())
            .uri("/hello")
            .header(ORIGIN, "https://pr-7.preview.example.com")
            .header(ACCEPT_ENCODING, "gzip")
            .body(Bytes::new())
            .expect("static request is valid");

        let sink = BufferSink::new();
        let mut res = Response::new(sink.clone());
        let result = pipeline.execute(&req, &mut res).and_then(|_| res.run_until_idle());
        if let Err(e) = result {
            error!(%method, cause = %e, status = %e.status_code(), "request failed");
            continue;
        }

        info!(
            %method,
            status = ?sink.sent_status(),
            headers = ?sink.sent_headers(),
            body_len = sink.body().len(),
            "response sent"
        );
    }
}
