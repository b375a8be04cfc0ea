use utoipa::OpenApi;

use crate::routes::{health, v1};

#[derive(OpenApi)]
#[openapi(info(
    title = "almo-server",
    description = "OpenAI-compatible multi-sample text completion API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(v1::api_docs());
    root
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn document_lists_public_paths() {
        let doc = get_docs();
        for path in ["/health", "/v1/completions", "/v1/models", "/v1/model/load", "/v1/auth/permission"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert!(doc.to_pretty_json().is_ok());
    }
}
