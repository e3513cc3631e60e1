//! Tools and Tool Dispatch
//!
//! Every action the remote model can invoke implements the single [`Tool`]
//! contract: a name, a JSON Schema for its arguments, and an `invoke` that
//! always produces a result map. The two product tools are webhook-backed and
//! share one implementation, [`WebhookTool`], parameterized by a static
//! [`ToolSpec`] row.

use crate::protocol::ToolResult;
use crate::tool_call::ToolCall;
use crate::webhook::{HttpWebhook, Webhook, WebhookOutcome};
use async_trait::async_trait;
use schemars::{JsonSchema, Schema, schema_for};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// --- Argument types ---

/// Which audience a newsletter subscriber belongs to.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[schemars(inline)]
pub enum Profile {
    Investor,
    #[serde(rename = "Property Owner")]
    PropertyOwner,
    Both,
}

/// Arguments for `subscribe_to_list`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct SubscribeToListArgs {
    /// Full name of the subscriber.
    pub name: String,
    /// Address the newsletter is sent to.
    #[schemars(email)]
    pub email: String,
    pub profile: Profile,
}

/// Arguments for `create_contact_request`.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct CreateContactRequestArgs {
    pub name: Option<String>,
    #[schemars(email)]
    pub email: String,
    /// What the user wants the team to follow up on.
    pub topic: String,
}

// --- Tool contract ---

/// A side-effecting action the remote model may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing the accepted arguments.
    fn argument_schema(&self) -> Value;

    /// Runs the tool. Failures are reported inside the returned map.
    async fn invoke(&self, args: &Value) -> Map<String, Value>;
}

/// Identifies which configured relay a tool writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Subscribe,
    Contact,
}

/// A row of the static tool table.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Keys copied from the call arguments into the relay payload.
    pub arguments: &'static [&'static str],
    pub required: &'static [&'static str],
    pub destination: Destination,
    /// The boolean key of the public result, e.g. `ok` or `created`.
    pub success_key: &'static str,
    schema: fn() -> Schema,
    validate: fn(&Value) -> Result<(), serde_json::Error>,
}

fn validate_as<T: DeserializeOwned>(args: &Value) -> Result<(), serde_json::Error> {
    T::deserialize(args).map(|_| ())
}

fn subscribe_schema() -> Schema {
    schema_for!(SubscribeToListArgs)
}

fn contact_schema() -> Schema {
    schema_for!(CreateContactRequestArgs)
}

pub static SUBSCRIBE_TO_LIST: ToolSpec = ToolSpec {
    name: "subscribe_to_list",
    description: "Add a lead to the newsletter",
    arguments: &["name", "email", "profile"],
    required: &["name", "email", "profile"],
    destination: Destination::Subscribe,
    success_key: "ok",
    schema: subscribe_schema,
    validate: validate_as::<SubscribeToListArgs>,
};

pub static CREATE_CONTACT_REQUEST: ToolSpec = ToolSpec {
    name: "create_contact_request",
    description: "Ask the human team to follow up with the user",
    arguments: &["name", "email", "topic"],
    required: &["email", "topic"],
    destination: Destination::Contact,
    success_key: "created",
    schema: contact_schema,
    validate: validate_as::<CreateContactRequestArgs>,
};

/// Every tool the product exposes to the model.
pub static TOOL_TABLE: [&ToolSpec; 2] = [&SUBSCRIBE_TO_LIST, &CREATE_CONTACT_REQUEST];

/// The relay collaborators, one per [`Destination`].
#[derive(Clone)]
pub struct Relays {
    pub subscribe: Arc<dyn Webhook>,
    pub contact: Arc<dyn Webhook>,
}

impl Relays {
    pub fn get(&self, destination: Destination) -> Arc<dyn Webhook> {
        match destination {
            Destination::Subscribe => self.subscribe.clone(),
            Destination::Contact => self.contact.clone(),
        }
    }
}

impl ToolSpec {
    /// Builds the relay payload: declared arguments present in the call plus
    /// the provenance tag.
    pub fn payload(&self, args: &Value, source: &str) -> Value {
        let mut payload = Map::new();
        if let Some(object) = args.as_object() {
            for key in self.arguments {
                if let Some(value) = object.get(*key).filter(|v| !v.is_null()) {
                    payload.insert((*key).to_string(), value.clone());
                }
            }
        }
        payload.insert("source".to_string(), Value::String(source.to_string()));
        Value::Object(payload)
    }

    /// Maps a relay outcome to the public result shape.
    pub fn result(&self, outcome: &WebhookOutcome) -> Map<String, Value> {
        let mut result = Map::new();
        result.insert(self.success_key.to_string(), Value::Bool(outcome.ok));
        if !outcome.ok {
            result.insert("status".to_string(), json!(outcome.status));
            result.insert("error".to_string(), outcome.detail());
        }
        result
    }

    fn missing_required(&self, args: &Value) -> Vec<&'static str> {
        self.required
            .iter()
            .copied()
            .filter(|key| args.get(*key).is_none_or(Value::is_null))
            .collect()
    }
}

/// A tool whose side effect is a single relay call.
pub struct WebhookTool {
    spec: &'static ToolSpec,
    webhook: Arc<dyn Webhook>,
    source: String,
}

impl WebhookTool {
    pub fn new(spec: &'static ToolSpec, webhook: Arc<dyn Webhook>, source: impl Into<String>) -> Self {
        Self {
            spec,
            webhook,
            source: source.into(),
        }
    }
}

#[async_trait]
impl Tool for WebhookTool {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    /// The generated schema without its document-level keys, as the model
    /// expects a bare `parameters` object.
    fn argument_schema(&self) -> Value {
        let mut schema = serde_json::to_value((self.spec.schema)()).unwrap_or(Value::Null);
        if let Some(object) = schema.as_object_mut() {
            object.remove("$schema");
            object.remove("title");
        }
        schema
    }

    async fn invoke(&self, args: &Value) -> Map<String, Value> {
        let missing = self.spec.missing_required(args);
        if !missing.is_empty() {
            warn!(tool = self.spec.name, ?missing, "Tool called without required arguments; forwarding anyway");
        } else if let Err(e) = (self.spec.validate)(args) {
            warn!(tool = self.spec.name, error = %e, "Tool arguments do not match schema; forwarding anyway");
        }

        let payload = self.spec.payload(args, &self.source);
        let outcome = self.webhook.post(&payload).await;
        info!(tool = self.spec.name, ok = outcome.ok, status = outcome.status, "Webhook tool finished");
        self.spec.result(&outcome)
    }
}

// --- Dispatcher ---

/// Routes recognized tool calls to registered tools.
#[derive(Default, Clone)]
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The product tool table, wired to the given relays.
    pub fn standard(relays: &Relays, source: impl Into<String>) -> Self {
        let source = source.into();
        let mut dispatcher = Self::new();
        for spec in TOOL_TABLE {
            let webhook = relays.get(spec.destination);
            dispatcher.register(Arc::new(WebhookTool::new(spec, webhook, source.clone())));
        }
        dispatcher
    }

    /// The product tool table with no relays configured. Every call answers
    /// with a failure result; useful for listing declarations.
    pub fn unconfigured() -> Self {
        let relays = Relays {
            subscribe: Arc::new(HttpWebhook::unconfigured()),
            contact: Arc::new(HttpWebhook::unconfigured()),
        };
        Self::standard(&relays, crate::DEFAULT_SOURCE_TAG)
    }

    /// Adds a tool, replacing any tool registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Runs the named tool. Returns `None` when no tool has that name.
    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.call_id))]
    pub async fn dispatch(&self, call: &ToolCall) -> Option<ToolResult> {
        let Some(tool) = self.tools.get(&call.name) else {
            debug!("No tool registered under this name; ignoring call");
            return None;
        };

        info!(degraded_args = call.is_degraded(), "Dispatching tool call");
        let result = tool.invoke(&call.args).await;
        Some(ToolResult::new(call.call_id.clone(), call.name.clone(), result))
    }

    /// Function declarations for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<Value> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
            .into_iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.argument_schema(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::MockWebhook;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            call_id: "c1".to_string(),
            args: args.clone(),
            raw_event: json!({ "tool_call": { "name": name, "arguments": args } }),
        }
    }

    fn relays(subscribe: Arc<dyn Webhook>, contact: Arc<dyn Webhook>) -> Relays {
        Relays { subscribe, contact }
    }

    fn unused_webhook() -> Arc<dyn Webhook> {
        let mut mock = MockWebhook::new();
        mock.expect_post().never();
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_subscribe_success() {
        let mut subscribe = MockWebhook::new();
        subscribe
            .expect_post()
            .withf(|payload| {
                payload
                    == &json!({
                        "name": "Ada",
                        "email": "ada@example.com",
                        "profile": "Investor",
                        "source": "realtime-agent"
                    })
            })
            .times(1)
            .returning(|_| WebhookOutcome::success(200, None));

        let dispatcher = ToolDispatcher::standard(&relays(Arc::new(subscribe), unused_webhook()), "realtime-agent");
        let result = dispatcher
            .dispatch(&call(
                "subscribe_to_list",
                json!({ "name": "Ada", "email": "ada@example.com", "profile": "Investor", "extra": 1 }),
            ))
            .await
            .expect("subscribe_to_list is registered");

        assert_eq!(result.call_id, "c1");
        assert_eq!(result.name, "subscribe_to_list");
        assert_eq!(Value::Object(result.result), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_subscribe_server_error() {
        let mut subscribe = MockWebhook::new();
        subscribe.expect_post().times(1).returning(|_| WebhookOutcome {
            ok: false,
            status: 500,
            body: Some(json!({ "message": "crm down" })),
            error: None,
        });

        let dispatcher = ToolDispatcher::standard(&relays(Arc::new(subscribe), unused_webhook()), "realtime-agent");
        let result = dispatcher
            .dispatch(&call(
                "subscribe_to_list",
                json!({ "name": "Ada", "email": "ada@example.com", "profile": "Both" }),
            ))
            .await
            .unwrap();

        assert_eq!(
            Value::Object(result.result),
            json!({ "ok": false, "status": 500, "error": { "message": "crm down" } })
        );
    }

    #[tokio::test]
    async fn test_contact_request_created() {
        let mut contact = MockWebhook::new();
        contact
            .expect_post()
            .withf(|payload| {
                payload == &json!({ "email": "a@b.c", "topic": "tokenization", "source": "kiosk" })
            })
            .times(1)
            .returning(|_| WebhookOutcome::success(201, None));

        let dispatcher = ToolDispatcher::standard(&relays(unused_webhook(), Arc::new(contact)), "kiosk");
        let result = dispatcher
            .dispatch(&call(
                "create_contact_request",
                json!({ "email": "a@b.c", "topic": "tokenization" }),
            ))
            .await
            .unwrap();

        assert_eq!(Value::Object(result.result), json!({ "created": true }));
    }

    #[tokio::test]
    async fn test_contact_request_unreachable() {
        let mut contact = MockWebhook::new();
        contact
            .expect_post()
            .returning(|_| WebhookOutcome::failure(0, "connection refused"));

        let dispatcher = ToolDispatcher::standard(&relays(unused_webhook(), Arc::new(contact)), "realtime-agent");
        let result = dispatcher
            .dispatch(&call("create_contact_request", json!({ "email": "a@b.c", "topic": "x" })))
            .await
            .unwrap();

        assert_eq!(
            Value::Object(result.result),
            json!({ "created": false, "status": 0, "error": "connection refused" })
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_ignored() {
        let dispatcher = ToolDispatcher::standard(&relays(unused_webhook(), unused_webhook()), "realtime-agent");
        assert!(dispatcher.dispatch(&call("launch_rocket", json!({}))).await.is_none());
    }

    #[tokio::test]
    async fn test_degraded_arguments_still_dispatch() {
        let mut subscribe = MockWebhook::new();
        subscribe
            .expect_post()
            .withf(|payload| payload == &json!({ "source": "realtime-agent" }))
            .times(1)
            .returning(|_| WebhookOutcome::success(200, None));

        let dispatcher = ToolDispatcher::standard(&relays(Arc::new(subscribe), unused_webhook()), "realtime-agent");
        let result = dispatcher
            .dispatch(&call("subscribe_to_list", json!("name=Ada")))
            .await
            .unwrap();
        assert_eq!(Value::Object(result.result), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_unconfigured_relay_reports_missing_url() {
        let dispatcher = ToolDispatcher::unconfigured();
        let result = dispatcher
            .dispatch(&call("create_contact_request", json!({ "email": "a@b.c", "topic": "x" })))
            .await
            .unwrap();
        assert_eq!(
            Value::Object(result.result),
            json!({ "created": false, "status": 500, "error": "Missing webhook URL" })
        );
    }

    #[test]
    fn test_definitions_expose_schemas() {
        let definitions = ToolDispatcher::unconfigured().definitions();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0]["name"], "create_contact_request");
        assert_eq!(definitions[1]["name"], "subscribe_to_list");
        assert_eq!(definitions[1]["type"], "function");

        let parameters = &definitions[1]["parameters"];
        let required: Vec<&str> = parameters["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"name"));
        assert!(required.contains(&"email"));
        assert!(required.contains(&"profile"));

        let contact_required = definitions[0]["parameters"]["required"].as_array().unwrap();
        assert!(!contact_required.iter().any(|v| v == "name"));
    }

    #[test]
    fn test_schemas_are_self_contained() {
        let definitions = ToolDispatcher::unconfigured().definitions();
        let parameters = &definitions[1]["parameters"];

        assert_eq!(parameters["type"], "object");
        assert_eq!(
            parameters["properties"]["profile"]["enum"],
            json!(["Investor", "Property Owner", "Both"])
        );
        assert_eq!(parameters["properties"]["email"]["format"], "email");
        assert_eq!(definitions[0]["parameters"]["properties"]["email"]["format"], "email");

        for definition in &definitions {
            let parameters = definition["parameters"].as_object().unwrap();
            for key in ["$schema", "title", "$defs"] {
                assert!(!parameters.contains_key(key), "{} carries {key}", definition["name"]);
            }
            assert!(!definition["parameters"].to_string().contains("$ref"));
        }
    }

    #[test]
    fn test_profile_wire_names() {
        assert_eq!(serde_json::to_value(Profile::PropertyOwner).unwrap(), json!("Property Owner"));
        let parsed: Profile = serde_json::from_value(json!("Investor")).unwrap();
        assert_eq!(parsed, Profile::Investor);
    }
}
