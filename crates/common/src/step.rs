//! Steps and their typed action payloads
//!
//! A step is written as an object carrying metadata (`stepId`,
//! `description`, `variables`, `unsafe`) plus exactly one action key:
//!
//! ```yaml
//! - stepId: open-home
//!   goTo: https://example.com
//! - click: "Sign in"
//! - runShell:
//!     command: echo
//!     args: ["hello"]
//!   variables:
//!     GREETING: $$outputs.stdio.stdout
//! ```
//!
//! The raw fields are kept so reports can echo the step exactly as written,
//! while `action` carries the parsed payload used for dispatch.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::types::{generate_id, one_or_many};

/// Default timeout for element lookups
pub const DEFAULT_ELEMENT_TIMEOUT_MS: u64 = 5000;

/// Every recognized action key, in the order they are looked up
pub const ACTION_KEYS: &[&str] = &[
    "checkLink",
    "click",
    "dragAndDrop",
    "find",
    "goTo",
    "httpRequest",
    "loadCookie",
    "loadVariables",
    "record",
    "runCode",
    "runShell",
    "saveCookie",
    "screenshot",
    "stopRecord",
    "type",
    "wait",
];

/// Action keys that need a live browser session
pub const DRIVER_ACTIONS: &[&str] = &[
    "click",
    "dragAndDrop",
    "find",
    "goTo",
    "loadCookie",
    "record",
    "saveCookie",
    "screenshot",
    "stopRecord",
    "type",
];

const META_KEYS: &[&str] = &["stepId", "description", "variables", "unsafe"];

/// One action instruction plus metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub step_id: String,
    pub description: Option<String>,
    /// Name -> expression, resolved and exported after the step succeeds
    pub variables: BTreeMap<String, Value>,
    pub unsafe_step: bool,
    pub action: Action,
    fields: Map<String, Value>,
}

impl Step {
    /// Build a step from a JSON object
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    fn from_parts(
        step_id: String,
        description: Option<String>,
        variables: BTreeMap<String, Value>,
        unsafe_step: bool,
        fields: Map<String, Value>,
    ) -> Self {
        let action = Action::from_fields(&fields);
        Self {
            step_id,
            description,
            variables,
            unsafe_step,
            action,
            fields,
        }
    }

    /// The raw action fields as written (everything except metadata)
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Return a copy whose action fields have every string passed through `f`.
    /// The action payload is re-parsed from the rewritten fields.
    pub fn map_strings(&self, f: &dyn Fn(&str) -> String) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), map_value_strings(v, f)))
            .collect();
        Self::from_parts(
            self.step_id.clone(),
            self.description.clone(),
            self.variables.clone(),
            self.unsafe_step,
            fields,
        )
    }
}

fn map_value_strings(value: &Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_value_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), map_value_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;

        let step_id = match fields.remove("stepId") {
            Some(Value::String(id)) => id,
            Some(Value::Null) | None => generate_id(),
            Some(other) => other.to_string(),
        };
        let description = fields
            .remove("description")
            .and_then(|v| v.as_str().map(String::from));
        let variables = match fields.remove("variables") {
            Some(Value::Null) | None => BTreeMap::new(),
            Some(v) => serde_json::from_value(v).map_err(D::Error::custom)?,
        };
        let unsafe_step = fields
            .remove("unsafe")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Step::from_parts(step_id, description, variables, unsafe_step, fields))
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("stepId", &self.step_id)?;
        if let Some(description) = &self.description {
            map.serialize_entry("description", description)?;
        }
        if !self.variables.is_empty() {
            map.serialize_entry("variables", &self.variables)?;
        }
        if self.unsafe_step {
            map.serialize_entry("unsafe", &true)?;
        }
        for (key, value) in &self.fields {
            if !META_KEYS.contains(&key.as_str()) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Tagged union over the recognized actions, each with a typed payload
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CheckLink(CheckLinkStep),
    Click(ClickStep),
    DragAndDrop(DragAndDropStep),
    Find(FindStep),
    GoTo(GoToStep),
    HttpRequest(HttpRequestStep),
    LoadCookie(CookieStep),
    LoadVariables(LoadVariablesStep),
    Record(RecordStep),
    RunCode(RunCodeStep),
    RunShell(RunShellStep),
    SaveCookie(CookieStep),
    Screenshot(ScreenshotStep),
    StopRecord,
    Type(TypeStep),
    Wait(WaitStep),
    /// A recognized key whose payload failed validation
    Invalid { key: String, reason: String },
    /// No recognized action key present
    Unrecognized { keys: Vec<String> },
}

impl Action {
    fn from_fields(fields: &Map<String, Value>) -> Self {
        let present: Vec<&str> = ACTION_KEYS
            .iter()
            .copied()
            .filter(|k| fields.contains_key(*k))
            .collect();
        let Some(&key) = present.first() else {
            return Action::Unrecognized {
                keys: fields.keys().cloned().collect(),
            };
        };
        if present.len() > 1 {
            return Action::Invalid {
                key: key.to_string(),
                reason: format!("multiple action keys: [{}]", present.join(", ")),
            };
        }
        let payload = fields[key].clone();

        let parsed = match key {
            "checkLink" => serde_json::from_value(payload).map(Action::CheckLink),
            "click" => serde_json::from_value(payload).map(Action::Click),
            "dragAndDrop" => serde_json::from_value(payload).map(Action::DragAndDrop),
            "find" => serde_json::from_value(payload).map(Action::Find),
            "goTo" => serde_json::from_value(payload).map(Action::GoTo),
            "httpRequest" => serde_json::from_value(payload).map(Action::HttpRequest),
            "loadCookie" => serde_json::from_value(payload).map(Action::LoadCookie),
            "loadVariables" => serde_json::from_value(payload).map(Action::LoadVariables),
            "record" => serde_json::from_value(payload).map(Action::Record),
            "runCode" => serde_json::from_value(payload).map(Action::RunCode),
            "runShell" => serde_json::from_value(payload).map(Action::RunShell),
            "saveCookie" => serde_json::from_value(payload).map(Action::SaveCookie),
            "screenshot" => serde_json::from_value(payload).map(Action::Screenshot),
            "stopRecord" => Ok(Action::StopRecord),
            "type" => serde_json::from_value(payload).map(Action::Type),
            "wait" => serde_json::from_value(payload).map(Action::Wait),
            _ => unreachable!("key taken from ACTION_KEYS"),
        };

        parsed.unwrap_or_else(|e| Action::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// The action key this variant was parsed from
    pub fn key(&self) -> &str {
        match self {
            Action::CheckLink(_) => "checkLink",
            Action::Click(_) => "click",
            Action::DragAndDrop(_) => "dragAndDrop",
            Action::Find(_) => "find",
            Action::GoTo(_) => "goTo",
            Action::HttpRequest(_) => "httpRequest",
            Action::LoadCookie(_) => "loadCookie",
            Action::LoadVariables(_) => "loadVariables",
            Action::Record(_) => "record",
            Action::RunCode(_) => "runCode",
            Action::RunShell(_) => "runShell",
            Action::SaveCookie(_) => "saveCookie",
            Action::Screenshot(_) => "screenshot",
            Action::StopRecord => "stopRecord",
            Action::Type(_) => "type",
            Action::Wait(_) => "wait",
            Action::Invalid { key, .. } => key,
            Action::Unrecognized { .. } => "unknown",
        }
    }

    pub fn requires_driver(&self) -> bool {
        DRIVER_ACTIONS.contains(&self.key())
    }
}

// ---------------------------------------------------------------------------
// Element criteria
// ---------------------------------------------------------------------------

/// AND-combined element criteria. Values written as `/pattern/` are regexes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_test_id: Option<String>,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub element_class: Vec<String>,

    /// Attribute name -> exact string/number, presence boolean, or `/regex/`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub element_attribute: BTreeMap<String, Value>,

    /// Accessible name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_aria: Option<String>,
}

impl ElementCriteria {
    pub fn is_empty(&self) -> bool {
        self.selector.is_none()
            && self.element_text.is_none()
            && self.element_id.is_none()
            && self.element_test_id.is_none()
            && self.element_class.is_empty()
            && self.element_attribute.is_empty()
            && self.element_aria.is_none()
    }
}

/// What to look for: a shorthand string or a criteria set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementTarget {
    pub shorthand: Option<String>,
    pub criteria: ElementCriteria,
    pub timeout_ms: u64,
}

impl ElementTarget {
    pub fn shorthand(value: impl Into<String>) -> Self {
        Self {
            shorthand: Some(value.into()),
            criteria: ElementCriteria::default(),
            timeout_ms: DEFAULT_ELEMENT_TIMEOUT_MS,
        }
    }

    pub fn criteria(criteria: ElementCriteria, timeout_ms: Option<u64>) -> Self {
        Self {
            shorthand: None,
            criteria,
            timeout_ms: timeout_ms.unwrap_or(DEFAULT_ELEMENT_TIMEOUT_MS),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shorthand.as_deref().map_or(true, str::is_empty) && self.criteria.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetRepr {
    Short(String),
    Full {
        #[serde(flatten)]
        criteria: ElementCriteria,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

impl From<TargetRepr> for ElementTarget {
    fn from(repr: TargetRepr) -> Self {
        match repr {
            TargetRepr::Short(s) => ElementTarget::shorthand(s),
            TargetRepr::Full { criteria, timeout } => ElementTarget::criteria(criteria, timeout),
        }
    }
}

impl<'de> Deserialize<'de> for ElementTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TargetRepr::deserialize(deserializer).map(Into::into)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// W3C WebDriver pointer button number
    pub fn code(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Browser actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ClickRepr")]
pub struct ClickStep {
    pub target: ElementTarget,
    pub button: MouseButton,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClickRepr {
    Short(String),
    Full {
        #[serde(flatten)]
        criteria: ElementCriteria,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        button: MouseButton,
    },
}

impl From<ClickRepr> for ClickStep {
    fn from(repr: ClickRepr) -> Self {
        match repr {
            ClickRepr::Short(s) => ClickStep {
                target: ElementTarget::shorthand(s),
                button: MouseButton::Left,
            },
            ClickRepr::Full { criteria, timeout, button } => ClickStep {
                target: ElementTarget::criteria(criteria, timeout),
                button,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "FindRepr")]
pub struct FindStep {
    pub target: ElementTarget,
    pub move_to: bool,
    pub click: Option<MouseButton>,
    pub type_keys: Option<TypeStep>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FindClick {
    Flag(bool),
    Button { #[serde(default)] button: MouseButton },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FindRepr {
    Short(String),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(flatten)]
        criteria: ElementCriteria,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        move_to: bool,
        #[serde(default)]
        click: Option<FindClick>,
        #[serde(default, rename = "type")]
        type_keys: Option<TypeStep>,
    },
}

impl From<FindRepr> for FindStep {
    fn from(repr: FindRepr) -> Self {
        match repr {
            FindRepr::Short(s) => FindStep {
                target: ElementTarget::shorthand(s),
                move_to: false,
                click: None,
                type_keys: None,
            },
            FindRepr::Full {
                criteria,
                timeout,
                move_to,
                click,
                type_keys,
            } => FindStep {
                target: ElementTarget::criteria(criteria, timeout),
                move_to,
                click: match click {
                    Some(FindClick::Flag(true)) => Some(MouseButton::Left),
                    Some(FindClick::Flag(false)) | None => None,
                    Some(FindClick::Button { button }) => Some(button),
                },
                type_keys,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "TypeRepr")]
pub struct TypeStep {
    pub keys: Vec<String>,
    pub input_delay_ms: u64,
    /// Element to focus first; empty means the active element
    pub target: ElementTarget,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TypeRepr {
    Short(String),
    Keys(Vec<String>),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(deserialize_with = "one_or_many")]
        keys: Vec<String>,
        #[serde(default)]
        input_delay: Option<u64>,
        #[serde(flatten)]
        criteria: ElementCriteria,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

impl From<TypeRepr> for TypeStep {
    fn from(repr: TypeRepr) -> Self {
        let empty = ElementTarget::criteria(ElementCriteria::default(), None);
        match repr {
            TypeRepr::Short(s) => TypeStep {
                keys: vec![s],
                input_delay_ms: 100,
                target: empty,
            },
            TypeRepr::Keys(keys) => TypeStep {
                keys,
                input_delay_ms: 100,
                target: empty,
            },
            TypeRepr::Full {
                keys,
                input_delay,
                criteria,
                timeout,
            } => TypeStep {
                keys,
                input_delay_ms: input_delay.unwrap_or(100),
                target: ElementTarget::criteria(criteria, timeout),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DragAndDropStep {
    pub source: ElementTarget,
    pub target: ElementTarget,
    #[serde(default = "default_drag_duration")]
    pub duration: u64,
}

fn default_drag_duration() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "GoToRepr")]
pub struct GoToStep {
    pub url: String,
    pub origin: Option<String>,
    pub timeout_ms: u64,
    pub wait_until: WaitUntil,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitUntil {
    /// Quiet period with no new network requests
    #[serde(default = "default_network_idle")]
    pub network_idle_time: Option<u64>,
    /// Quiet period with no DOM mutations
    #[serde(default = "default_dom_idle")]
    pub dom_idle_time: Option<u64>,
    #[serde(default)]
    pub find: Option<ElementTarget>,
}

impl Default for WaitUntil {
    fn default() -> Self {
        Self {
            network_idle_time: default_network_idle(),
            dom_idle_time: default_dom_idle(),
            find: None,
        }
    }
}

fn default_network_idle() -> Option<u64> {
    Some(500)
}

fn default_dom_idle() -> Option<u64> {
    Some(1000)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GoToRepr {
    Short(String),
    #[serde(rename_all = "camelCase")]
    Full {
        url: String,
        #[serde(default)]
        origin: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        wait_until: Option<WaitUntil>,
    },
}

impl From<GoToRepr> for GoToStep {
    fn from(repr: GoToRepr) -> Self {
        match repr {
            GoToRepr::Short(url) => GoToStep {
                url,
                origin: None,
                timeout_ms: 30_000,
                wait_until: WaitUntil::default(),
            },
            GoToRepr::Full {
                url,
                origin,
                timeout,
                wait_until,
            } => GoToStep {
                url,
                origin,
                timeout_ms: timeout.unwrap_or(30_000),
                wait_until: wait_until.unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WaitRepr")]
pub struct WaitStep {
    pub duration_ms: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WaitRepr {
    Millis(u64),
    Flag(bool),
    Full { duration: u64 },
}

impl From<WaitRepr> for WaitStep {
    fn from(repr: WaitRepr) -> Self {
        let duration_ms = match repr {
            WaitRepr::Millis(ms) => ms,
            WaitRepr::Flag(true) => 5000,
            WaitRepr::Flag(false) => 0,
            WaitRepr::Full { duration } => duration,
        };
        WaitStep { duration_ms }
    }
}

/// When an existing screenshot should be replaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overwrite {
    Always,
    #[default]
    Never,
    AboveVariation,
}

impl<'de> Deserialize<'de> for Overwrite {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(true) => Ok(Overwrite::Always),
            Repr::Flag(false) => Ok(Overwrite::Never),
            Repr::Text(t) => match t.as_str() {
                "true" => Ok(Overwrite::Always),
                "false" => Ok(Overwrite::Never),
                "aboveVariation" => Ok(Overwrite::AboveVariation),
                other => Err(D::Error::custom(format!("invalid overwrite value: {}", other))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Padding {
    #[serde(default)]
    pub top: u32,
    #[serde(default)]
    pub right: u32,
    #[serde(default)]
    pub bottom: u32,
    #[serde(default)]
    pub left: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CropTarget {
    #[serde(flatten)]
    pub criteria: ElementCriteria,
    #[serde(default)]
    pub padding: Padding,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ScreenshotRepr")]
pub struct ScreenshotStep {
    pub path: Option<String>,
    pub directory: Option<String>,
    /// Allowed fraction of differing pixels (0.0 - 1.0)
    pub max_variation: f64,
    pub overwrite: Overwrite,
    pub crop: Option<CropTarget>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScreenshotRepr {
    Flag(bool),
    Path(String),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        directory: Option<String>,
        #[serde(default)]
        max_variation: Option<f64>,
        #[serde(default)]
        overwrite: Overwrite,
        #[serde(default)]
        crop: Option<CropTarget>,
    },
}

impl From<ScreenshotRepr> for ScreenshotStep {
    fn from(repr: ScreenshotRepr) -> Self {
        let mut step = ScreenshotStep {
            path: None,
            directory: None,
            max_variation: 0.05,
            overwrite: Overwrite::Never,
            crop: None,
        };
        match repr {
            ScreenshotRepr::Flag(_) => {}
            ScreenshotRepr::Path(path) => step.path = Some(path),
            ScreenshotRepr::Full {
                path,
                directory,
                max_variation,
                overwrite,
                crop,
            } => {
                step.path = path;
                step.directory = directory;
                step.max_variation = max_variation.unwrap_or(0.05);
                step.overwrite = overwrite;
                step.crop = crop;
            }
        }
        step
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RecordRepr")]
pub struct RecordStep {
    pub path: Option<String>,
    pub directory: Option<String>,
    pub overwrite: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordRepr {
    Flag(bool),
    Path(String),
    Full {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        directory: Option<String>,
        #[serde(default)]
        overwrite: bool,
    },
}

impl From<RecordRepr> for RecordStep {
    fn from(repr: RecordRepr) -> Self {
        match repr {
            RecordRepr::Flag(_) => RecordStep {
                path: None,
                directory: None,
                overwrite: false,
            },
            RecordRepr::Path(path) => RecordStep {
                path: Some(path),
                directory: None,
                overwrite: false,
            },
            RecordRepr::Full {
                path,
                directory,
                overwrite,
            } => RecordStep {
                path,
                directory,
                overwrite,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "CookieRepr")]
pub struct CookieStep {
    pub name: String,
    pub path: Option<String>,
    pub directory: Option<String>,
    /// Environment variable used instead of a file
    pub variable: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CookieRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        directory: Option<String>,
        #[serde(default)]
        variable: Option<String>,
    },
}

impl From<CookieRepr> for CookieStep {
    fn from(repr: CookieRepr) -> Self {
        match repr {
            CookieRepr::Name(name) => CookieStep {
                name,
                path: None,
                directory: None,
                variable: None,
            },
            CookieRepr::Full {
                name,
                path,
                directory,
                variable,
            } => CookieStep {
                name,
                path,
                directory,
                variable,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Host actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ShellRepr")]
pub struct RunShellStep {
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: Option<String>,
    pub exit_codes: Vec<i32>,
    /// Expected output: substring or `/regex/`
    pub stdio: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ShellRepr {
    Command(String),
    #[serde(rename_all = "camelCase")]
    Full {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        working_directory: Option<String>,
        #[serde(default)]
        exit_codes: Option<Vec<i32>>,
        #[serde(default)]
        stdio: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

impl From<ShellRepr> for RunShellStep {
    fn from(repr: ShellRepr) -> Self {
        match repr {
            ShellRepr::Command(command) => RunShellStep {
                command,
                args: Vec::new(),
                working_directory: None,
                exit_codes: vec![0],
                stdio: None,
                timeout_ms: 60_000,
            },
            ShellRepr::Full {
                command,
                args,
                working_directory,
                exit_codes,
                stdio,
                timeout,
            } => RunShellStep {
                command,
                args,
                working_directory,
                exit_codes: exit_codes.unwrap_or_else(|| vec![0]),
                stdio,
                timeout_ms: timeout.unwrap_or(60_000),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCodeStep {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default = "default_exit_codes")]
    pub exit_codes: Vec<i32>,
    #[serde(default)]
    pub stdio: Option<String>,
    #[serde(default = "default_code_timeout", rename = "timeout")]
    pub timeout_ms: u64,
}

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_code_timeout() -> u64 {
    60_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct LoadVariablesStep {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestBody {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseExpectation {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "HttpRepr")]
pub struct HttpRequestStep {
    pub url: Option<String>,
    pub method: String,
    pub open_api: Option<Value>,
    pub request: HttpRequestBody,
    pub response: HttpResponseExpectation,
    pub status_codes: Vec<u16>,
    pub timeout_ms: u64,
    pub allow_additional_fields: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HttpRepr {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        open_api: Option<Value>,
        #[serde(default)]
        request: HttpRequestBody,
        #[serde(default)]
        response: HttpResponseExpectation,
        #[serde(default)]
        status_codes: Option<Vec<u16>>,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default)]
        allow_additional_fields: Option<bool>,
    },
}

impl From<HttpRepr> for HttpRequestStep {
    fn from(repr: HttpRepr) -> Self {
        match repr {
            HttpRepr::Url(url) => HttpRequestStep {
                url: Some(url),
                method: "get".to_string(),
                open_api: None,
                request: HttpRequestBody::default(),
                response: HttpResponseExpectation::default(),
                status_codes: vec![200, 201],
                timeout_ms: 60_000,
                allow_additional_fields: true,
            },
            HttpRepr::Full {
                url,
                method,
                open_api,
                request,
                response,
                status_codes,
                timeout,
                allow_additional_fields,
            } => HttpRequestStep {
                url,
                method: method.unwrap_or_else(|| "get".to_string()).to_lowercase(),
                open_api,
                request,
                response,
                status_codes: status_codes.unwrap_or_else(|| vec![200, 201]),
                timeout_ms: timeout.unwrap_or(60_000),
                allow_additional_fields: allow_additional_fields.unwrap_or(true),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "CheckLinkRepr")]
pub struct CheckLinkStep {
    pub url: String,
    pub origin: Option<String>,
    pub status_codes: Vec<u16>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CheckLinkRepr {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Full {
        url: String,
        #[serde(default)]
        origin: Option<String>,
        #[serde(default, deserialize_with = "optional_codes")]
        status_codes: Option<Vec<u16>>,
    },
}

fn optional_codes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u16>>, D::Error> {
    one_or_many(deserializer).map(Some)
}

impl From<CheckLinkRepr> for CheckLinkStep {
    fn from(repr: CheckLinkRepr) -> Self {
        match repr {
            CheckLinkRepr::Url(url) => CheckLinkStep {
                url,
                origin: None,
                status_codes: vec![200, 201, 202],
            },
            CheckLinkRepr::Full {
                url,
                origin,
                status_codes,
            } => CheckLinkStep {
                url,
                origin,
                status_codes: status_codes.unwrap_or_else(|| vec![200, 201, 202]),
            },
        }
    }
}
