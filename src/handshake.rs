//! Challenge/echo handshake.
//!
//! The server encrypts a random challenge under the token-derived key and sends it
//! as one frame. The client decrypts it and sends the plaintext back as a raw
//! `HANDSHAKE_SIZE` block (no length prefix). Only a peer that derived the same key
//! from the same token can produce the echo, so the token itself never crosses
//! the wire.

use log::debug;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cryptography::{create_challenge, decrypt, encrypt, DerivedKey};
use crate::error::{AuthenticationError, ProtocolError, SessionError};
use crate::networking::Connection;
use crate::HANDSHAKE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    /// Server: encrypted challenge written, waiting for the echo.
    ChallengeSent,
    /// Client: waiting for the encrypted challenge.
    AwaitingChallenge,
    Verified,
    Done,
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Done | HandshakeState::Failed)
    }
}

#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Handshake::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Handshake {
            state: HandshakeState::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Server side: send the encrypted challenge and verify the echo.
    pub async fn run_server<S>(
        &mut self,
        conn: &mut Connection<S>,
        key: &DerivedKey,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.server_steps(conn, key).await;
        self.finish(result)
    }

    /// Client side: decrypt the challenge and echo it back.
    pub async fn run_client<S>(
        &mut self,
        conn: &mut Connection<S>,
        key: &DerivedKey,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.client_steps(conn, key).await;
        self.finish(result)
    }

    async fn server_steps<S>(
        &mut self,
        conn: &mut Connection<S>,
        key: &DerivedKey,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let challenge = create_challenge();
        let encrypted = encrypt(&challenge, key)?;

        conn.write_frame(&encrypted).await?;
        self.advance(HandshakeState::ChallengeSent);

        // the echo is a raw block of the declared size, not a frame
        let echo = conn.read_block(HANDSHAKE_SIZE).await?;
        if !bool::from(challenge.as_slice().ct_eq(echo.as_slice())) {
            return Err(AuthenticationError::HandshakeMismatch.into());
        }

        self.advance(HandshakeState::Verified);
        Ok(())
    }

    async fn client_steps<S>(
        &mut self,
        conn: &mut Connection<S>,
        key: &DerivedKey,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.advance(HandshakeState::AwaitingChallenge);
        let encrypted = conn.read_frame().await?;

        // a wrong token fails right here
        let challenge = decrypt(&encrypted, key)?;
        if challenge.len() != HANDSHAKE_SIZE {
            return Err(ProtocolError::ChallengeSize {
                expected: HANDSHAKE_SIZE,
                got: challenge.len(),
            }
            .into());
        }

        conn.write_block(&challenge).await?;
        self.advance(HandshakeState::Verified);
        Ok(())
    }

    fn finish(&mut self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        match result {
            Ok(()) => {
                self.advance(HandshakeState::Done);
                Ok(())
            }
            Err(e) => {
                self.advance(HandshakeState::Failed);
                Err(e)
            }
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug!("Handshake {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
