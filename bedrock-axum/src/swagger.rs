//! OpenAPI 3 document generated from the registered routes, plus a
//! Swagger UI page that loads it.

use std::sync::Arc;

use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use crate::routes::RouteDoc;

pub const OPENAPI_PATH: &str = "/swagger/openapi.json";

pub fn openapi(title: &str, version: &str, docs: &[RouteDoc]) -> Value {
    let mut paths = Map::new();

    for doc in docs {
        let mut operation = Map::new();
        if let Some(summary) = &doc.options.summary {
            operation.insert("summary".into(), json!(summary));
        }
        if let Some(feature) = &doc.feature {
            operation.insert("tags".into(), json!([feature]));
        }
        let parameters: Vec<Value> = path_params(&doc.path)
            .into_iter()
            .map(|name| json!({ "name": name, "in": "path", "required": true, "schema": { "type": "string" } }))
            .collect();
        if !parameters.is_empty() {
            operation.insert("parameters".into(), Value::Array(parameters));
        }
        if doc.options.authenticated {
            operation.insert("security".into(), json!([{ "bearerAuth": [] }]));
        }
        if !doc.options.permissions.is_empty() {
            operation.insert("x-permissions".into(), json!(doc.options.permissions));
        }

        let mut responses = Map::new();
        responses.insert("200".into(), json!({ "description": "OK" }));
        if doc.options.authenticated {
            responses.insert("401".into(), json!({ "$ref": "#/components/responses/Error" }));
        }
        if !doc.options.permissions.is_empty() {
            responses.insert("403".into(), json!({ "$ref": "#/components/responses/Error" }));
        }
        responses.insert("default".into(), json!({ "$ref": "#/components/responses/Error" }));
        operation.insert("responses".into(), Value::Object(responses));

        let item = paths
            .entry(doc.path.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(item) = item {
            item.insert(doc.method.to_lowercase(), Value::Object(operation));
        }
    }

    json!({
        "openapi": "3.0.3",
        "info": { "title": title, "version": version },
        "paths": paths,
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            },
            "responses": {
                "Error": {
                    "description": "Error envelope",
                    "content": { "application/json": { "schema": { "$ref": "#/components/schemas/ErrorEnvelope" } } }
                }
            },
            "schemas": {
                "ErrorEnvelope": {
                    "type": "object",
                    "properties": {
                        "requestId": { "type": "string" },
                        "timestamp": { "type": "string", "format": "date-time" },
                        "uri": { "type": "string" },
                        "error": {
                            "type": "object",
                            "properties": {
                                "code": { "type": "string" },
                                "message": { "type": "string" }
                            }
                        },
                        "success": { "type": "boolean" }
                    }
                }
            }
        }
    })
}

/// `{id}` and `{*rest}` segments of an axum path.
fn path_params(path: &str) -> Vec<String> {
    path.split('/')
        .filter_map(|seg| seg.strip_prefix('{')?.strip_suffix('}'))
        .map(|name| name.trim_start_matches('*').to_string())
        .collect()
}

const INDEX: &str = r##"<!doctype html>
<html>
  <head>
    <meta charset="utf-8" />
    <title>API documentation</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
  </head>
  <body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
      window.ui = SwaggerUIBundle({ url: "/swagger/openapi.json", dom_id: "#swagger-ui" });
    </script>
  </body>
</html>
"##;

pub fn router<S>(document: Value) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let document = Arc::new(document);
    Router::new()
        .route(
            OPENAPI_PATH,
            get(move || {
                let document = Arc::clone(&document);
                async move { Json(document.as_ref().clone()) }
            }),
        )
        .route("/swagger", get(|| async { Html(INDEX) }))
        .route("/swagger/", get(|| async { Html(INDEX) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::RouteOptions;

    fn doc(method: &str, path: &str, options: RouteOptions) -> RouteDoc {
        RouteDoc {
            method: method.to_string(),
            path: path.to_string(),
            feature: Some("notes".to_string()),
            options,
        }
    }

    #[test]
    fn index_page_mounts_the_ui_on_the_document() {
        assert!(INDEX.contains(r##"dom_id: "#swagger-ui""##));
        assert!(INDEX.contains(OPENAPI_PATH));
        assert!(INDEX.trim_end().ends_with("</html>"));
    }

    #[test]
    fn methods_on_one_path_share_an_item() {
        let docs = vec![
            doc("GET", "/notes/{id}", RouteOptions::new().summary("Read a note")),
            doc("DELETE", "/notes/{id}", RouteOptions::new().permission("notes:delete")),
        ];
        let document = openapi("notes", "1.0.0", &docs);

        let item = &document["paths"]["/notes/{id}"];
        assert_eq!(item["get"]["summary"], "Read a note");
        assert_eq!(item["get"]["parameters"][0]["name"], "id");
        assert_eq!(item["get"]["tags"][0], "notes");
        assert_eq!(item["delete"]["security"][0]["bearerAuth"], json!([]));
        assert_eq!(item["delete"]["x-permissions"][0], "notes:delete");
    }

    #[test]
    fn wildcard_params_are_named_without_the_star() {
        assert_eq!(path_params("/files/{*rest}"), vec!["rest"]);
        assert_eq!(path_params("/t/{tenantId}/notes/{id}"), vec!["tenantId", "id"]);
        assert!(path_params("/health").is_empty());
    }
}
