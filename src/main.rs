// src/main.rs
use std::io;
use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer, Responder};
use sqlx::postgres::PgPoolOptions;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use lms_backend::config::Config;
use lms_backend::gateway::StripeGateway;
use lms_backend::{api, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(io::Error::other)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(io::Error::other)?;

    sqlx::migrate!().run(&pool).await.map_err(io::Error::other)?;

    let gateway = StripeGateway::new(
        &config.stripe_api_base,
        &config.stripe_secret_key,
        config.gateway_timeout,
    )
    .map_err(io::Error::other)?;

    if config.stripe_webhook_secret.is_none() {
        log::warn!("STRIPE_WEBHOOK_SECRET not set, provider webhook disabled");
    }

    let bind = (config.bind_addr.clone(), config.port);
    let state = web::Data::new(AppState {
        pool,
        gateway: Arc::new(gateway),
        config: Arc::new(config),
    });

    log::info!("listening on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let jwt_secret = state.config.jwt_secret.clone();

        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .app_data(api::json_config())
            .app_data(api::query_config())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            .service(
                web::scope("/api")
                    // public
                    .service(api::auth::signup)
                    .service(api::auth::login)
                    // authenticated
                    .service(
                        web::scope("")
                            .wrap(api::auth::JwtMiddleware::new(&jwt_secret))
                            .service(api::auth::logout)
                            .service(api::users::get_profile)
                            .service(api::users::update_profile)
                            .service(api::purchases::purchase_course)
                            .service(api::purchases::verify_payment)
                            .service(api::users::update_course_progress)
                            .service(api::users::get_course_progress)
                            .service(api::users::add_rating)
                            .service(api::users::update_role)
                            .service(api::educator::add_course),
                    ),
            )
            .service(api::webhooks_stripe::stripe_webhook)
    })
    .bind(bind)?
    .run()
    .await
}
