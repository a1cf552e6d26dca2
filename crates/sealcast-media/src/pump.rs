//! Async glue that drives a transform between two channels.
//!
//! The transforms themselves are synchronous; these pumps only move
//! frames between the encoder/decoder side and the network side of a
//! track. They end when either channel closes.

use bytes::Bytes;
use tokio::sync::mpsc;

use sealcast_protocol::ParticipantId;

use crate::{DecryptOutcome, DecryptTransform, DropReason, EncryptTransform, InboundFrame, OutboundFrame};

/// Drive the send side: encoded frames in, wire frames out.
///
/// Returns the transform so the caller can read final counters. Stops on
/// channel close or on a fatal RNG error.
pub async fn run_encrypt_pump(
    mut transform: EncryptTransform,
    mut encoded: mpsc::Receiver<Bytes>,
    network: mpsc::Sender<OutboundFrame>,
) -> EncryptTransform {
    while let Some(frame) = encoded.recv().await {
        match transform.process(&frame) {
            Ok(out) => {
                if network.send(out).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::error!(%err, "send transform failed, stopping track");
                break;
            }
        }
    }
    transform
}

/// Drive the receive side: wire frames in, plaintext out.
///
/// Senders whose frames hit an unknown generation are reported through
/// `missing_keys` (if installed) so the session layer can issue an
/// `e2ee-key-request`; the notification never blocks the media path.
pub async fn run_decrypt_pump(
    mut transform: DecryptTransform,
    mut network: mpsc::Receiver<InboundFrame>,
    decoder: mpsc::Sender<Bytes>,
    missing_keys: Option<mpsc::UnboundedSender<ParticipantId>>,
) -> DecryptTransform {
    while let Some(frame) = network.recv().await {
        match transform.process(&frame.sender, frame.sequence, &frame.payload) {
            DecryptOutcome::Decrypted(plaintext) | DecryptOutcome::PassThrough(plaintext) => {
                if decoder.send(plaintext).await.is_err() {
                    break;
                }
            }
            DecryptOutcome::Dropped(DropReason::UnknownGeneration) => {
                if let Some(tx) = &missing_keys {
                    let _ = tx.send(frame.sender.clone());
                }
            }
            DecryptOutcome::Dropped(_) => {}
        }
    }
    transform
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealcast_crypto::{KeyManagerConfig, SenderKeyManager, DEFAULT_WINDOW_BITS};

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    #[tokio::test]
    async fn pumps_roundtrip_frames_end_to_end() {
        let bob = SenderKeyManager::new(pid("bob"), KeyManagerConfig::default());
        bob.ensure_local_key().unwrap();
        let alice = SenderKeyManager::new(pid("alice"), KeyManagerConfig::default());
        let exported = bob.export_local().unwrap();
        alice
            .import_remote(
                &exported.participant_id,
                exported.key_material.as_slice(),
                exported.generation,
            )
            .unwrap();

        let (encoded_tx, encoded_rx) = mpsc::channel(8);
        let (wire_tx, mut wire_rx) = mpsc::channel(8);
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (decoded_tx, mut decoded_rx) = mpsc::channel(8);

        let send_task = tokio::spawn(run_encrypt_pump(
            EncryptTransform::new(bob),
            encoded_rx,
            wire_tx,
        ));
        let recv_task = tokio::spawn(run_decrypt_pump(
            DecryptTransform::new(alice, DEFAULT_WINDOW_BITS, false).unwrap(),
            inbound_rx,
            decoded_tx,
            None,
        ));

        for payload in ["one", "two", "three"] {
            encoded_tx
                .send(Bytes::copy_from_slice(payload.as_bytes()))
                .await
                .unwrap();
        }
        drop(encoded_tx);

        // Shuttle the wire frames across, as the network would.
        let mut forwarded = 0;
        while let Some(out) = wire_rx.recv().await {
            inbound_tx
                .send(InboundFrame {
                    sender: pid("bob"),
                    sequence: out.sequence,
                    payload: out.payload,
                })
                .await
                .unwrap();
            forwarded += 1;
        }
        drop(inbound_tx);
        assert_eq!(forwarded, 3);

        assert_eq!(decoded_rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(decoded_rx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(decoded_rx.recv().await.unwrap(), Bytes::from_static(b"three"));

        let send_stats = send_task.await.unwrap().stats();
        assert_eq!(send_stats.frames_encrypted, 3);
        let recv_stats = recv_task.await.unwrap().stats();
        assert_eq!(recv_stats.frames_decrypted, 3);
    }

    #[tokio::test]
    async fn missing_key_notices_reach_the_session_layer() {
        let bob = SenderKeyManager::new(pid("bob"), KeyManagerConfig::default());
        bob.ensure_local_key().unwrap();
        // Alice never imported bob's key.
        let alice = SenderKeyManager::new(pid("alice"), KeyManagerConfig::default());

        let mut send = EncryptTransform::new(bob);
        let wire = send.process(b"frame").unwrap();

        let (inbound_tx, inbound_rx) = mpsc::channel(2);
        let (decoded_tx, mut decoded_rx) = mpsc::channel(2);
        let (missing_tx, mut missing_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_decrypt_pump(
            DecryptTransform::new(alice, DEFAULT_WINDOW_BITS, false).unwrap(),
            inbound_rx,
            decoded_tx,
            Some(missing_tx),
        ));

        inbound_tx
            .send(InboundFrame {
                sender: pid("bob"),
                sequence: wire.sequence,
                payload: wire.payload,
            })
            .await
            .unwrap();
        drop(inbound_tx);

        assert_eq!(missing_rx.recv().await.unwrap(), pid("bob"));
        assert!(decoded_rx.recv().await.is_none());
        assert_eq!(task.await.unwrap().stats().unknown_generation, 1);
    }
}
