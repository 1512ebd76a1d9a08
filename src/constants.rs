/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

use std::time::Duration;

/// How often the server pings each connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long a connection may stay silent before it is considered dead.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Window for the in-band authentication handshake after the socket opens.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a call may ring before the relay gives up on it.
/// Overridable via `RING_TIMEOUT_SECS`.
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(30);

/// How often ringing calls are checked against the ring timeout.
pub const RING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Sender identity attached to events synthesized by the relay itself.
pub const SYSTEM_USER: &str = "system";

/// Conversation ids must match this shape before they touch any table.
pub const VALID_ID_PATTERN: &str = r"^[A-Za-z0-9@._-]{1,128}$";
