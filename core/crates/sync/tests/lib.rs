
use std::{collections::HashMap, time::Duration};

use ld_core_sync::{
	ld_event_log::{self, Event, EventLog, EventLogOptions, PushPayload, StoreId, TableName},
	ClientMessage, Error, PullProxy, PushIngress, PushResponse, RelayRegistry, ServerMessage,
	Upstream,
};

use serde_json::{json, Value};
use tempfile::TempDir;

struct Instance {
	log: EventLog,
	url: String,
	_dir: TempDir,
}

impl Instance {
	async fn new() -> Result<Self, Box<dyn std::error::Error>> {
		let dir = tempfile::tempdir()?;
		let url = format!("sqlite://{}?mode=rwc", dir.path().join("sync.db").display());

		Ok(Self {
			log: EventLog::connect(&url, &EventLogOptions::default()).await?,
			url,
			_dir: dir,
		})
	}

	async fn provision(&self, id: &str) -> Result<(), Box<dyn std::error::Error>> {
		Ok(self.log.store(&store_id(id)).ensure_provisioned().await?)
	}

	async fn events(&self, id: &str) -> Result<Vec<Event>, Box<dyn std::error::Error>> {
		Ok(self.log.store(&store_id(id)).read_events(None).await?)
	}

	/// Runs raw SQL next to the event log, for putting the database into odd states.
	async fn execute(&self, sql: &str) -> Result<(), Box<dyn std::error::Error>> {
		let conn = sea_orm::Database::connect(&self.url).await?;
		sea_orm::ConnectionTrait::execute_unprepared(&conn, sql).await?;
		conn.close().await?;

		Ok(())
	}

	async fn pull_proxy(&self) -> Result<PullProxy, Box<dyn std::error::Error>> {
		let upstream = Upstream::new(&mock_upstream::spawn().await, None, None)?;

		Ok(PullProxy::with_client(
			self.log.clone(),
			upstream,
			mock_upstream::client(),
		))
	}
}

fn store_id(id: &str) -> StoreId {
	StoreId::try_from(id).expect("store id")
}

fn event(seq_num: i64) -> Value {
	json!({
		"seqNum": seq_num,
		"parentSeqNum": if seq_num > 1 { json!(seq_num - 1) } else { Value::Null },
		"name": "v1.X",
		"args": {},
		"clientId": "c1",
		"sessionId": "sess1",
	})
}

fn push_body(id: &str, batch: &[Value]) -> Vec<u8> {
	serde_json::to_vec(&json!({ "storeId": id, "batch": batch })).expect("json")
}

fn pull_params(id: &str, handle: Option<(&str, &str)>) -> HashMap<String, String> {
	let args = match handle {
		None => json!({ "storeId": id }),
		Some((offset, handle)) => {
			json!({ "storeId": id, "handle": { "offset": offset, "handle": handle } })
		}
	};

	HashMap::from([("args".to_string(), args.to_string())])
}

fn events(seq_nums: impl IntoIterator<Item = i64>) -> Vec<Event> {
	seq_nums
		.into_iter()
		.map(|n| serde_json::from_value(event(n)).expect("event"))
		.collect()
}

#[tokio::test]
async fn push_persists_the_batch() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	instance.provision("s1").await?;

	let ingress = PushIngress::new(instance.log.clone());
	let res = ingress.push(&push_body("s1", &[event(1)])).await?;

	assert_eq!(res, PushResponse { success: true });
	assert_eq!(serde_json::to_value(res)?, json!({ "success": true }));
	assert_eq!(instance.events("s1").await?, events([1]));

	Ok(())
}

#[tokio::test]
async fn pushing_the_same_event_twice_fails() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	instance.provision("s1").await?;
	let ingress = PushIngress::new(instance.log.clone());

	ingress.push(&push_body("s1", &[event(1)])).await?;
	let err = ingress
		.push(&push_body("s1", &[event(1)]))
		.await
		.expect_err("duplicate");

	assert!(matches!(
		err,
		Error::EventLog(ld_event_log::Error::DuplicateSequence { .. })
	));
	assert_eq!(instance.events("s1").await?, events([1]));

	Ok(())
}

#[tokio::test]
async fn colliding_batch_is_rejected_entirely() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	instance.provision("s1").await?;
	let ingress = PushIngress::new(instance.log.clone());

	ingress.push(&push_body("s1", &[event(2)])).await?;
	assert!(ingress
		.push(&push_body("s1", &[event(1), event(2)]))
		.await
		.is_err());

	assert_eq!(instance.events("s1").await?, events([2]));

	Ok(())
}

#[tokio::test]
async fn invalid_pushes_never_touch_storage() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	instance.provision("s1").await?;
	let ingress = PushIngress::new(instance.log.clone());

	for body in [
		b"{".to_vec(),
		push_body("s1", &[]),
		push_body("", &[event(1)]),
		push_body("s1", &[event(1), json!({ "seqNum": 2 })]),
	] {
		assert!(matches!(
			ingress.push(&body).await,
			Err(Error::Validation(_))
		));
	}

	assert!(instance.events("s1").await?.is_empty());

	Ok(())
}

#[tokio::test]
async fn push_does_not_provision() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let ingress = PushIngress::new(instance.log.clone());

	assert!(matches!(
		ingress.push(&push_body("unseen", &[event(1)])).await,
		Err(Error::EventLog(ld_event_log::Error::Database(_)))
	));

	Ok(())
}

#[tokio::test]
async fn first_pull_provisions_before_forwarding() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let proxy = instance.pull_proxy().await?;

	let response = proxy.pull(&pull_params("fresh", None)).await?;
	assert!(response.status().is_success());
	assert_eq!(response.headers()["electric-handle"], "h-1");

	let body = serde_json::from_slice::<Value>(&response.bytes().await?)?;
	assert_eq!(body["query"]["offset"], "-1");
	assert_eq!(
		body["query"]["table"],
		TableName::for_store(&store_id("fresh")).as_str()
	);

	// The push following the first pull finds its table
	PushIngress::new(instance.log.clone())
		.push(&push_body("fresh", &[event(1)]))
		.await?;
	assert_eq!(instance.events("fresh").await?, events([1]));

	Ok(())
}

#[tokio::test]
async fn live_pulls_do_not_provision() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let proxy = instance.pull_proxy().await?;

	let response = proxy.pull(&pull_params("s1", Some(("0_0", "h-1")))).await?;
	let body = serde_json::from_slice::<Value>(&response.bytes().await?)?;
	assert_eq!(body["query"]["live"], "true");
	assert_eq!(body["query"]["handle"], "h-1");

	assert!(instance.events("s1").await.is_err(), "no table was created");

	Ok(())
}

#[tokio::test]
async fn upstream_errors_pass_through() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let proxy = instance.pull_proxy().await?;

	let response = proxy
		.pull(&pull_params("s1", Some(("0_0", mock_upstream::STALE_HANDLE))))
		.await?;

	assert_eq!(response.status().as_u16(), 409);
	assert_eq!(response.headers()["electric-handle"], "h-2");
	assert_eq!(
		serde_json::from_slice::<Value>(&response.bytes().await?)?,
		json!([{ "headers": { "control": "must-refetch" } }])
	);

	Ok(())
}

#[tokio::test]
async fn unreachable_upstream_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let proxy = PullProxy::with_client(
		instance.log.clone(),
		Upstream::new("http://127.0.0.1:1", None, None)?,
		mock_upstream::client(),
	);

	assert!(matches!(
		proxy.pull(&pull_params("s1", None)).await,
		Err(Error::Upstream(_))
	));

	Ok(())
}

#[tokio::test]
async fn malformed_pull_args_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let proxy = instance.pull_proxy().await?;

	assert!(matches!(
		proxy.pull(&HashMap::new()).await,
		Err(Error::PullArgs(_))
	));

	Ok(())
}

fn client_push(request_id: &str, id: &str, seq_nums: impl IntoIterator<Item = i64>) -> ClientMessage {
	ClientMessage::Push {
		request_id: request_id.to_string(),
		store_id: store_id(id),
		batch: events(seq_nums),
	}
}

#[tokio::test]
async fn relay_acks_and_broadcasts_to_other_connections() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let relays = RelayRegistry::new(instance.log.clone(), Duration::from_secs(60));

	let mut alice = relays.connect(store_id("s1")).await;
	let mut bob = relays.connect(store_id("s1")).await;
	assert_ne!(alice.id(), bob.id());

	// The relay provisions its store, no pull needed
	let reply = alice.handle(client_push("r1", "s1", [1, 2])).await;
	assert_eq!(
		reply,
		ServerMessage::PushAck {
			request_id: "r1".to_string()
		}
	);

	let broadcast = tokio::time::timeout(Duration::from_secs(5), bob.next_broadcast())
		.await?
		.expect("relay running");
	assert_eq!(
		broadcast,
		ServerMessage::PushBroadcast {
			batch: events([1, 2])
		}
	);

	// The pusher doesn't get its own batch back
	assert!(
		tokio::time::timeout(Duration::from_millis(100), alice.next_broadcast())
			.await
			.is_err()
	);

	assert_eq!(instance.events("s1").await?, events([1, 2]));

	Ok(())
}

#[tokio::test]
async fn relay_nacks_rejected_batches() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let relays = RelayRegistry::new(instance.log.clone(), Duration::from_secs(60));
	let conn = relays.connect(store_id("s1")).await;

	assert!(matches!(
		conn.handle(client_push("r1", "s1", [1])).await,
		ServerMessage::PushAck { .. }
	));

	let ServerMessage::PushNack {
		request_id,
		message,
	} = conn.handle(client_push("r2", "s1", [1])).await
	else {
		panic!("duplicate push must be nacked");
	};
	assert_eq!(request_id, "r2");
	assert!(message.contains("conflicts"));

	assert!(matches!(
		conn.push(PushPayload {
			store_id: store_id("other"),
			batch: events([5]),
		})
		.await,
		Err(Error::StoreMismatch { .. })
	));

	assert!(matches!(
		conn.handle(client_push("r3", "s1", [])).await,
		ServerMessage::PushNack { .. }
	));

	assert_eq!(instance.events("s1").await?, events([1]));

	Ok(())
}

#[tokio::test]
async fn relay_retries_provisioning_that_failed_on_start() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let table = TableName::for_store(&store_id("s1"));

	// An index squatting on the table's name makes `CREATE TABLE` fail
	instance.execute("CREATE TABLE squatter (x INTEGER)").await?;
	instance
		.execute(&format!(r#"CREATE INDEX "{table}" ON squatter (x)"#))
		.await?;

	let relays = RelayRegistry::new(instance.log.clone(), Duration::from_secs(60));
	let conn = relays.connect(store_id("s1")).await;

	let ServerMessage::PushNack { message, .. } = conn.handle(client_push("r1", "s1", [1])).await
	else {
		panic!("push can't succeed without a table");
	};
	assert_eq!(message, "failed to provision store");

	instance.execute(&format!(r#"DROP INDEX "{table}""#)).await?;

	assert_eq!(
		conn.handle(client_push("r2", "s1", [1])).await,
		ServerMessage::PushAck {
			request_id: "r2".to_string()
		}
	);
	assert_eq!(instance.events("s1").await?, events([1]));

	Ok(())
}

#[tokio::test]
async fn relay_nacks_hide_storage_details() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let relays = RelayRegistry::new(instance.log.clone(), Duration::from_secs(60));
	let conn = relays.connect(store_id("s1")).await;

	conn.handle(client_push("r1", "s1", [1])).await;

	let ServerMessage::PushNack { message, .. } = conn.handle(client_push("r2", "s1", [1])).await
	else {
		panic!("duplicate push must be nacked");
	};

	let table = TableName::for_store(&store_id("s1"));
	assert_eq!(message, "batch conflicts with already persisted events");
	assert!(!message.contains(table.as_str()));
	assert!(!message.to_lowercase().contains("unique"));

	// Client mistakes are still spelled out
	let ServerMessage::PushNack { message, .. } = conn.handle(client_push("r3", "s1", [])).await
	else {
		panic!("empty push must be nacked");
	};
	assert!(message.contains("at least one event"));

	Ok(())
}

#[tokio::test]
async fn relay_messages_use_tagged_json() -> Result<(), Box<dyn std::error::Error>> {
	let message = serde_json::from_value::<ClientMessage>(json!({
		"type": "push",
		"requestId": "r1",
		"storeId": "s1",
		"batch": [event(1)],
	}))?;
	assert_eq!(message, client_push("r1", "s1", [1]));

	assert_eq!(
		serde_json::to_value(ServerMessage::PushNack {
			request_id: "r1".to_string(),
			message: "nope".to_string(),
		})?,
		json!({ "type": "pushNack", "requestId": "r1", "message": "nope" })
	);

	Ok(())
}

#[tokio::test]
async fn idle_relays_retire_and_restart_on_demand() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	let relays = RelayRegistry::new(instance.log.clone(), Duration::from_millis(50));

	let conn = relays.connect(store_id("s1")).await;
	assert_eq!(relays.running().await, vec![store_id("s1")]);

	// Attached connections keep the relay alive past the idle timeout
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(relays.running().await, vec![store_id("s1")]);

	drop(conn);

	tokio::time::timeout(Duration::from_secs(5), async {
		while !relays.running().await.is_empty() {
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	})
	.await?;

	let conn = relays.connect(store_id("s1")).await;
	assert!(matches!(
		conn.handle(client_push("r1", "s1", [1])).await,
		ServerMessage::PushAck { .. }
	));

	Ok(())
}

#[tokio::test]
async fn both_ingress_paths_are_arbitrated_by_seq_num() -> Result<(), Box<dyn std::error::Error>> {
	let instance = Instance::new().await?;
	instance.provision("s1").await?;

	let ingress = PushIngress::new(instance.log.clone());
	let relays = RelayRegistry::new(instance.log.clone(), Duration::from_secs(60));
	let conn = relays.connect(store_id("s1")).await;

	let body = push_body("s1", &[event(1), event(2)]);
	let (http, relayed) = tokio::join!(
		ingress.push(&body),
		conn.push(PushPayload {
			store_id: store_id("s1"),
			batch: events([2, 3]),
		})
	);

	assert!(
		http.is_ok() != relayed.is_ok(),
		"exactly one of the overlapping batches wins"
	);

	let persisted = instance.events("s1").await?;
	if http.is_ok() {
		assert_eq!(persisted, events([1, 2]));
	} else {
		assert_eq!(persisted, events([2, 3]));
	}

	Ok(())
}
