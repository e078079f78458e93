//! Documentation OpenAPI pour les endpoints stations.

use utoipa::OpenApi;

/// Documentation OpenAPI pour l'API de contrôle des stations.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::list_stations,
        crate::api::create_station,
        crate::api::get_station,
        crate::api::start_station,
        crate::api::stop_station,
    ),
    components(
        schemas(
            crate::station::Station,
            crate::station::StationStatus,
            crate::station::ShoutcastConfig,
            crate::station::StationDefinition,
            crate::station::ShoutcastDefinition,
            crate::station::PortValue,
            crate::error::FieldIssue,
            crate::api::ErrorResponse,
        )
    ),
    tags(
        (name = "stations", description = "Création et pilotage des stations de diffusion")
    ),
    info(
        title = "PMO Station API",
        version = "0.1.0",
        description = r#"
# Stations de diffusion

Chaque station associe une playlist à un point de montage Icecast.
Le démarrage lance un encodeur dédié ; l'arrêt lui envoie SIGTERM puis
le tue si le délai configuré est dépassé.

Statuts :
- `stopped` : aucun encodeur
- `running` : encodeur lancé (`pid` renseigné en mode réel)

Les erreurs renvoient `{ "error", "message" }`, plus `fields` pour les
erreurs de validation.
        "#,
        license(
            name = "MIT",
        ),
    )
)]
pub struct ApiDoc;
