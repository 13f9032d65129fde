// SPDX-License-Identifier: MIT

//! One-shot control-plane client behind `mcpmux call`: connects to a
//! running daemon's control socket, sends one `Request`, prints the
//! `Response`, and translates the result into the §6 exit-code contract.

use std::path::Path;

use mux_protocol::{read_message, write_message, Request, Response};
use tokio::net::UnixStream;

use crate::exit_error::ExitError;

pub async fn call(data_dir: &Path, request: Request) -> Result<(), ExitError> {
    let socket_path = crate::app::control_socket_path(data_dir);
    let mut stream = UnixStream::connect(&socket_path).await.map_err(|err| {
        ExitError::runtime(format!("could not reach mcpmux daemon at {}: {err}", socket_path.display()))
    })?;

    write_message(&mut stream, &request)
        .await
        .map_err(|err| ExitError::runtime(format!("failed to send request: {err}")))?;
    let response: Response = read_message(&mut stream)
        .await
        .map_err(|err| ExitError::runtime(format!("failed to read response: {err}")))?;

    print_response(&response)
}

fn print_response(response: &Response) -> Result<(), ExitError> {
    match response {
        Response::Error { message, category } => Err(ExitError::runtime(format!("[{category}] {message}"))),
        other => {
            let rendered = serde_json::to_string_pretty(other).unwrap_or_else(|_| format!("{other:?}"));
            println!("{rendered}");
            Ok(())
        }
    }
}
