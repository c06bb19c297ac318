//! Lenient views over the brokerage endpoints the session drives directly.

// crates.io
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Field id the provider uses for the last traded price.
pub const LAST_PRICE_FIELD: &str = "31";

/// One row of a market data snapshot, keyed by provider field id.
pub type SnapshotRow = Map<String, Value>;

/// Brokerage authentication flags reported by `tickle` and `iserver/auth/ssodh/init`.
///
/// Every flag is optional; the provider omits them while the gateway is still starting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatus {
	/// Brokerage session is authenticated.
	pub authenticated: Option<bool>,
	/// Another session competes for the same user.
	pub competing: Option<bool>,
	/// Gateway is connected to the backend.
	pub connected: Option<bool>,
	/// Free-form provider message, when present.
	pub message: Option<String>,
}
impl AuthStatus {
	/// Extracts the flags from an `authStatus`-shaped object, ignoring unexpected types.
	pub fn from_value(value: &Value) -> Self {
		Self {
			authenticated: value.get("authenticated").and_then(Value::as_bool),
			competing: value.get("competing").and_then(Value::as_bool),
			connected: value.get("connected").and_then(Value::as_bool),
			message: value
				.get("message")
				.and_then(Value::as_str)
				.filter(|s| !s.is_empty())
				.map(ToOwned::to_owned),
		}
	}

	/// `true` only when the provider explicitly reports an authenticated session.
	pub fn is_authenticated(&self) -> bool {
		self.authenticated == Some(true)
	}
}

/// Parsed reply of the keep-alive endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickleStatus {
	/// Provider session id.
	pub session: Option<String>,
	/// Flags under `iserver.authStatus`.
	pub auth_status: AuthStatus,
}
impl TickleStatus {
	/// Extracts the status from a tickle body, tolerating missing or mistyped fields.
	pub fn from_value(value: &Value) -> Self {
		Self {
			session: value.get("session").and_then(Value::as_str).map(ToOwned::to_owned),
			auth_status: value
				.pointer("/iserver/authStatus")
				.map(AuthStatus::from_value)
				.unwrap_or_default(),
		}
	}
}

/// Request shape for [`Session::market_snapshot`](crate::session::Session::market_snapshot).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotQuery {
	/// Contract ids to fetch.
	pub conids: Vec<u64>,
	/// Field ids requested from the provider.
	pub fields: Vec<String>,
	/// Field ids that must be present before a row counts as ready.
	pub required_fields: Vec<String>,
}
impl SnapshotQuery {
	/// Queries the last price for `conids`.
	pub fn new(conids: impl IntoIterator<Item = u64>) -> Self {
		Self {
			conids: conids.into_iter().collect(),
			fields: vec![LAST_PRICE_FIELD.to_owned()],
			required_fields: vec![LAST_PRICE_FIELD.to_owned()],
		}
	}

	/// Replaces the requested fields; required fields are added to the request automatically.
	pub fn with_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.fields = fields.into_iter().map(Into::into).collect();

		self
	}

	/// Replaces the readiness requirement.
	pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.required_fields = fields.into_iter().map(Into::into).collect();

		self
	}

	/// Comma-joined field list sent upstream (requested plus required, deduplicated).
	pub fn fields_param(&self) -> String {
		let mut fields = Vec::<&str>::new();

		for field in self.fields.iter().chain(&self.required_fields) {
			if !fields.contains(&field.as_str()) {
				fields.push(field);
			}
		}

		fields.join(",")
	}

	/// Returns `true` once every required field carries a value.
	pub fn is_ready(&self, row: &SnapshotRow) -> bool {
		self.required_fields.iter().all(|field| match row.get(field) {
			None | Some(Value::Null) => false,
			Some(Value::String(s)) => !s.trim().is_empty(),
			Some(_) => true,
		})
	}
}

pub(crate) fn conids_param(ids: &[u64]) -> String {
	ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",")
}

/// Splits a snapshot body into `(conid, row)` pairs, skipping rows without a usable `conid`.
pub(crate) fn snapshot_rows(body: Value) -> Vec<(u64, SnapshotRow)> {
	let Value::Array(rows) = body else {
		return Vec::new();
	};

	rows.into_iter()
		.filter_map(|row| match row {
			Value::Object(row) => Some(row),
			_ => None,
		})
		.filter_map(|row| {
			let conid = match row.get("conid")? {
				Value::Number(n) => n.as_u64()?,
				Value::String(s) => s.trim().parse().ok()?,
				_ => return None,
			};

			Some((conid, row))
		})
		.collect()
}
