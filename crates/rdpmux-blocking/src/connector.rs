use std::io::{Read, Write};

use tracing::{debug, info, warn};

use rdpmux_connector::{
    ClientConnector, ClientConnectorState, ConnectionResult, ConnectorError, ConnectorErrorExt as _,
    ConnectorErrorKind, ConnectorResult, Sequence,
};
use rdpmux_core::WriteBuf;

use crate::framed::Framed;

#[non_exhaustive]
pub struct ShouldUpgrade;

/// Runs the connection sequence up to the point where the transport must be
/// upgraded (TLS handshake or CredSSP) by external code.
pub fn connect_begin<S>(framed: &mut Framed<S>, connector: &mut ClientConnector) -> ConnectorResult<ShouldUpgrade>
where
    S: Read + Write,
{
    let mut buf = WriteBuf::new();

    info!("Begin connection procedure");

    while !connector.should_perform_security_upgrade() {
        single_sequence_step(framed, connector, &mut buf)?;
    }

    Ok(ShouldUpgrade)
}

pub fn skip_connect_begin(connector: &mut ClientConnector) -> ShouldUpgrade {
    assert!(connector.should_perform_security_upgrade());
    ShouldUpgrade
}

#[non_exhaustive]
pub struct Upgraded;

pub fn mark_as_upgraded(_: ShouldUpgrade, connector: &mut ClientConnector) -> Upgraded {
    debug!("Marked as upgraded");
    connector.mark_security_upgrade_as_done();
    Upgraded
}

/// Runs the rest of the connection sequence until every channel is joined.
pub fn connect_finalize<S>(
    _: Upgraded,
    framed: &mut Framed<S>,
    mut connector: ClientConnector,
) -> ConnectorResult<ConnectionResult>
where
    S: Read + Write,
{
    let mut buf = WriteBuf::new();

    debug!("Remaining of connection sequence");

    let result = loop {
        single_sequence_step(framed, &mut connector, &mut buf)?;

        if let ClientConnectorState::Connected { result } = connector.state {
            break result;
        }
    };

    info!("Connected with success");

    Ok(result)
}

/// Dials connection attempts until the security negotiation settles.
///
/// A negotiation failure tears the transport down and retries with the next
/// protocol in the downgrade ladder (NLA → TLS → RDP), re-dialing through
/// `stream_factory`. Any other error is final.
pub fn connect_with_downgrade<S, F>(
    config: rdpmux_connector::Config,
    mut make_connector: impl FnMut(rdpmux_connector::Config) -> ClientConnector,
    mut stream_factory: F,
) -> ConnectorResult<(Framed<S>, ClientConnector, ShouldUpgrade)>
where
    S: Read + Write,
    F: FnMut() -> std::io::Result<S>,
{
    let mut protocol = config.initial_security_protocol();

    loop {
        let stream = stream_factory()
            .map_err(|e| ConnectorError::custom("transport dial", e))?;
        let mut framed = Framed::new(stream);

        let mut attempt_config = config.clone();
        attempt_config.nla_security = protocol.contains(rdpmux_pdu::nego::SecurityProtocol::HYBRID);
        attempt_config.tls_security = protocol.contains(rdpmux_pdu::nego::SecurityProtocol::SSL)
            && !protocol.contains(rdpmux_pdu::nego::SecurityProtocol::HYBRID);
        if protocol == rdpmux_pdu::nego::SecurityProtocol::RDP {
            attempt_config.nla_security = false;
            attempt_config.tls_security = false;
        }

        let mut connector = make_connector(attempt_config);

        match connect_begin(&mut framed, &mut connector) {
            Ok(should_upgrade) => return Ok((framed, connector, should_upgrade)),
            Err(e) => match e.kind() {
                ConnectorErrorKind::Negotiation(failure) => {
                    let failure = *failure;

                    match config.downgrade_security_protocol(protocol) {
                        Some(downgraded) => {
                            warn!(%failure, ?downgraded, "Security negotiation failed, downgrading");
                            protocol = downgraded;
                            // The TCP connection is torn down between
                            // attempts; dropping `framed` closes it.
                        }
                        None => return Err(e),
                    }
                }
                _ => return Err(e),
            },
        }
    }
}

/// Runs one step of the sequence: reads the frame the current hint asks for
/// (if any), lets the sequence process it, and flushes what it wrote.
pub fn single_sequence_step<S>(
    framed: &mut Framed<S>,
    sequence: &mut dyn Sequence,
    buf: &mut WriteBuf,
) -> ConnectorResult<()>
where
    S: Read + Write,
{
    buf.clear();

    let written = if let Some(next_pdu_hint) = sequence.next_pdu_hint() {
        debug!(
            connector.state = sequence.state().name(),
            hint = ?next_pdu_hint,
            "Wait for PDU"
        );

        let pdu = framed
            .read_by_hint(next_pdu_hint)
            .map_err(|e| ConnectorError::custom("read frame by hint", e))?;

        sequence.step(&pdu, buf)?
    } else {
        sequence.step_no_input(buf)?
    };

    if let Some(response_len) = written.size() {
        debug_assert_eq!(buf.filled_len(), response_len);
        framed
            .write_all(buf.filled())
            .map_err(|e| ConnectorError::custom("write all", e))?;
    }

    Ok(())
}
