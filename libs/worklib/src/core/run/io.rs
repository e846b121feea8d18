// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! User-facing run I/O
//!
//! read/write/netcat broker data between the server and a run's working
//! directory or container. They execute on the caller's thread: netcat in
//! particular blocks on socket I/O for as long as the container takes to
//! answer, so callers must budget for that. State needed from the registry
//! is cloned out under the lock first; no file or socket I/O happens while
//! the lock is held.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;

use crate::core::config::NETCAT_BUFFER_SIZE;
use crate::core::delegates::{ReplyFn, ReplyHeaders};
use crate::core::run::manager::RunManager;
use crate::core::{Result, WorkerError};

impl RunManager {
    /// Serve a read from the run's working directory through the reader
    /// helper. The reader invokes `reply` exactly once, possibly with a
    /// streaming body.
    pub fn read(
        &self,
        uuid: &str,
        path: &str,
        args: &HashMap<String, String>,
        reply: ReplyFn,
    ) {
        let run_state = {
            let runs = self.runs.lock();
            runs.get(uuid).cloned()
        };
        match run_state {
            Some(run_state) => self.reader.read(&run_state, path, args, reply),
            None => reply(
                Some(WorkerError::RunNotFound(uuid.to_string())),
                ReplyHeaders::new(),
                Vec::new(),
            ),
        }
    }

    /// Write `contents` to `path` inside the run's working directory.
    ///
    /// Writes aimed at a declared dependency mount point are refused
    /// silently: dependencies are read-only, and the request is treated as
    /// a benign race rather than an error.
    pub fn write(&self, uuid: &str, path: &str, contents: &str) -> Result<()> {
        let (bundle_path, is_dependency) = {
            let runs = self.runs.lock();
            let run = runs
                .get(uuid)
                .ok_or_else(|| WorkerError::RunNotFound(uuid.to_string()))?;
            (run.bundle_path.clone(), run.bundle.is_dependency_path(path))
        };

        if is_dependency {
            return Ok(());
        }

        let target = bundle_path.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, contents)?;
        Ok(())
    }

    /// Send `message` to a port of the run's container and reply with
    /// everything it answers until it closes the connection.
    ///
    /// The container is addressed on the general worker network. The
    /// response is read in fixed-size chunks and delivered as one buffer.
    pub fn netcat(&self, uuid: &str, port: u16, message: &str, reply: ReplyFn) {
        match self.netcat_inner(uuid, port, message) {
            Ok(body) => reply(None, ReplyHeaders::new(), body),
            Err(e) => reply(Some(e), ReplyHeaders::new(), Vec::new()),
        }
    }

    fn netcat_inner(&self, uuid: &str, port: u16, message: &str) -> Result<Vec<u8>> {
        let container_id = {
            let runs = self.runs.lock();
            let run = runs
                .get(uuid)
                .ok_or_else(|| WorkerError::RunNotFound(uuid.to_string()))?;
            run.container_id
                .clone()
                .ok_or_else(|| WorkerError::ContainerNotFound(uuid.to_string()))?
        };

        let ip = self
            .runtime
            .ip_on_network(&self.networks.general, &container_id)?;

        let mut stream = TcpStream::connect((ip, port))?;
        stream.write_all(message.as_bytes())?;

        let mut body = Vec::new();
        let mut chunk = [0u8; NETCAT_BUFFER_SIZE];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        Ok(body)
    }
}
