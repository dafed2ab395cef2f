//! Connection initialization (ICReq / ICResp exchange).
//!
//! The initiator sends ICReq with its PDU data alignment, requested digests
//! and R2T limit; the target answers with ICResp carrying its alignment, the
//! digests it enables and MAXH2CDATA. Each side then pads transmitted PDU
//! data to the alignment the peer asked for.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::params::{QueuePairConfig, QueuePairParams, pda_to_alignment};
use crate::core::*;
use crate::pdu::{
    CommonHeader, Framing, IcReq, IcResp, PduFlags, PduHeader, PduType, construct_pdu, term_req,
};

fn digest_bits(header: bool, data: bool) -> u8 {
    let mut bits = 0;
    if header {
        bits |= DGST_HEADER;
    }
    if data {
        bits |= DGST_DATA;
    }
    bits
}

/// Read one IC PDU of `kind`.
async fn read_ic<S>(stream: &mut S, kind: PduType) -> Result<(PduHeader, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; IC_HEADER_LEN];
    stream.read_exact(&mut buf[..COMMON_HEADER_SIZE]).await?;
    let mut ch = [0u8; COMMON_HEADER_SIZE];
    ch.copy_from_slice(&buf[..COMMON_HEADER_SIZE]);
    let ch = CommonHeader::from_bytes(&ch);

    let violation = if ch.pdu_type != kind.as_byte() {
        Some(PduError::field(OFFSET_PDU_TYPE))
    } else if ch.flags != PduFlags::NONE {
        Some(PduError::field(OFFSET_FLAGS))
    } else if ch.hlen as usize != IC_HEADER_LEN {
        Some(PduError::field(OFFSET_HLEN))
    } else if ch.pdo != 0 {
        Some(PduError::field(OFFSET_PDO))
    } else if ch.plen as usize != IC_HEADER_LEN {
        Some(PduError::field(OFFSET_PLEN))
    } else {
        None
    };
    if let Some(error) = violation {
        return Err(reject(stream, kind.receiver(), error, &buf[..COMMON_HEADER_SIZE]).await);
    }

    stream.read_exact(&mut buf[COMMON_HEADER_SIZE..]).await?;
    let header = PduHeader::parse(kind, &buf)?;
    Ok((header, buf))
}

/// Send a termination request and return the error to fail with.
async fn reject<S>(stream: &mut S, sender: Role, error: PduError, header: &[u8]) -> QueuePairError
where
    S: AsyncWrite + Unpin,
{
    warn!(%error, "connection initialization rejected");
    let pdu = term_req(sender, &error, header);
    if let Err(e) = stream.write_all(&pdu).await {
        return e.into();
    }
    if let Err(e) = stream.flush().await {
        return e.into();
    }
    error.into()
}

/// Initiator side: send ICReq, validate ICResp.
pub async fn initiate<S>(stream: &mut S, config: &QueuePairConfig) -> Result<QueuePairParams>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    config.validate()?;
    let requested = digest_bits(config.header_digest, config.data_digest);
    let req = PduHeader::IcReq(IcReq {
        pfv: PDU_FORMAT_VERSION,
        hpda: config.pda,
        dgst: requested,
        maxr2t: config.max_r2t,
    });
    stream
        .write_all(&construct_pdu(&req, PduFlags::NONE, &[], &Framing::default()))
        .await?;
    stream.flush().await?;

    let (header, raw) = read_ic(stream, PduType::IcResp).await?;
    let PduHeader::IcResp(resp) = header else {
        return Err(QueuePairError::Negotiation("expected ICResp".into()));
    };

    let violation = if resp.pfv != PDU_FORMAT_VERSION {
        Some(PduError::UnsupportedParameter { offset: OFFSET_PFV })
    } else if resp.cpda > MAX_PDA {
        Some(PduError::field(OFFSET_PDA))
    } else if resp.dgst & !requested != 0 {
        Some(PduError::field(OFFSET_DGST))
    } else if resp.maxh2cdata < MIN_MAX_H2C_DATA || resp.maxh2cdata % 4 != 0 {
        Some(PduError::field(OFFSET_IC_LIMIT))
    } else {
        None
    };
    if let Some(error) = violation {
        return Err(reject(stream, Role::Initiator, error, &raw).await);
    }

    let params = initiator_params(config, &resp);
    info!(
        header_digest = params.header_digest,
        data_digest = params.data_digest,
        tx_alignment = params.tx_alignment,
        max_h2c_data = params.max_h2c_data,
        "initiator connection established"
    );
    Ok(params)
}

fn initiator_params(config: &QueuePairConfig, resp: &IcResp) -> QueuePairParams {
    QueuePairParams {
        header_digest: resp.dgst & DGST_HEADER != 0,
        data_digest: resp.dgst & DGST_DATA != 0,
        tx_alignment: pda_to_alignment(resp.cpda),
        max_h2c_data: resp.maxh2cdata,
        ..QueuePairParams::from_config(Role::Initiator, config)
    }
}

/// Target side: validate ICReq, answer with ICResp.
pub async fn accept<S>(stream: &mut S, config: &QueuePairConfig) -> Result<QueuePairParams>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    config.validate()?;
    let (header, raw) = read_ic(stream, PduType::IcReq).await?;
    let PduHeader::IcReq(req) = header else {
        return Err(QueuePairError::Negotiation("expected ICReq".into()));
    };

    let violation = if req.pfv != PDU_FORMAT_VERSION {
        Some(PduError::UnsupportedParameter { offset: OFFSET_PFV })
    } else if req.hpda > MAX_PDA {
        Some(PduError::UnsupportedParameter { offset: OFFSET_PDA })
    } else {
        None
    };
    if let Some(error) = violation {
        return Err(reject(stream, Role::Target, error, &raw).await);
    }

    let allowed = digest_bits(config.header_digest, config.data_digest);
    let enabled = req.dgst & allowed;
    let resp = PduHeader::IcResp(IcResp {
        pfv: PDU_FORMAT_VERSION,
        cpda: config.pda,
        dgst: enabled,
        maxh2cdata: config.max_h2c_data,
    });
    stream
        .write_all(&construct_pdu(&resp, PduFlags::NONE, &[], &Framing::default()))
        .await?;
    stream.flush().await?;

    let params = QueuePairParams {
        header_digest: enabled & DGST_HEADER != 0,
        data_digest: enabled & DGST_DATA != 0,
        tx_alignment: pda_to_alignment(req.hpda),
        max_r2t: req.maxr2t.min(config.max_r2t),
        ..QueuePairParams::from_config(Role::Target, config)
    };
    info!(
        header_digest = params.header_digest,
        data_digest = params.data_digest,
        tx_alignment = params.tx_alignment,
        max_r2t = params.max_r2t,
        "target connection established"
    );
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair(
        host: QueuePairConfig,
        controller: QueuePairConfig,
    ) -> (Result<QueuePairParams>, Result<QueuePairParams>) {
        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::join!(initiate(&mut a, &host), accept(&mut b, &controller))
    }

    #[tokio::test]
    async fn test_negotiated_parameters() {
        let host = QueuePairConfig::builder()
            .header_digest(true)
            .data_digest(true)
            .pda(1)
            .max_r2t(7)
            .build();
        let controller = QueuePairConfig::builder()
            .header_digest(true)
            .pda(3)
            .max_r2t(2)
            .max_h2c_data(8192)
            .build();

        let (h, c) = pair(host, controller).await;
        let (h, c) = (h.unwrap(), c.unwrap());

        assert_eq!(h.role, Role::Initiator);
        assert!(h.header_digest && !h.data_digest);
        assert!(c.header_digest && !c.data_digest);
        assert_eq!(h.tx_alignment, 16);
        assert_eq!(h.rx_alignment, 8);
        assert_eq!(c.tx_alignment, 8);
        assert_eq!(c.rx_alignment, 16);
        assert_eq!(h.max_h2c_data, 8192);
        assert_eq!(c.max_r2t, 2);
    }

    #[tokio::test]
    async fn test_ic_pdu_layout() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let config = QueuePairConfig::builder()
            .data_digest(true)
            .pda(2)
            .max_r2t(3)
            .build();
        let host = tokio::spawn(async move {
            let _ = initiate(&mut a, &config).await;
        });

        let mut req = vec![0u8; IC_HEADER_LEN];
        b.read_exact(&mut req).await.unwrap();
        assert_eq!(hex::encode(&req[..16]), "00008000800000000000020203000000");
        drop(b);
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_bad_pfv() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let target = tokio::spawn(async move { accept(&mut b, &QueuePairConfig::default()).await });

        let req = PduHeader::IcReq(IcReq {
            pfv: 1,
            hpda: 0,
            dgst: 0,
            maxr2t: 0,
        });
        a.write_all(&construct_pdu(&req, PduFlags::NONE, &[], &Framing::default()))
            .await
            .unwrap();

        let err = target.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            QueuePairError::Protocol(PduError::UnsupportedParameter { offset: OFFSET_PFV })
        ));

        let mut term = vec![0u8; TERM_REQ_HEADER_LEN];
        a.read_exact(&mut term).await.unwrap();
        assert_eq!(term[0], PDU_TYPE_C2H_TERM_REQ);
        assert_eq!(u16::from_le_bytes([term[8], term[9]]), 0x06);
        assert_eq!(
            u32::from_le_bytes([term[10], term[11], term[12], term[13]]),
            OFFSET_PFV
        );
    }

    #[tokio::test]
    async fn test_rejects_small_maxh2cdata() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let host = tokio::spawn(async move { initiate(&mut a, &QueuePairConfig::default()).await });

        let mut req = vec![0u8; IC_HEADER_LEN];
        b.read_exact(&mut req).await.unwrap();
        let resp = PduHeader::IcResp(IcResp {
            pfv: 0,
            cpda: 0,
            dgst: 0,
            maxh2cdata: 1024,
        });
        b.write_all(&construct_pdu(&resp, PduFlags::NONE, &[], &Framing::default()))
            .await
            .unwrap();

        let err = host.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            QueuePairError::Protocol(PduError::InvalidHeaderField {
                offset: OFFSET_IC_LIMIT
            })
        ));
        let mut term = vec![0u8; TERM_REQ_HEADER_LEN];
        b.read_exact(&mut term).await.unwrap();
        assert_eq!(term[0], PDU_TYPE_H2C_TERM_REQ);
    }

    #[tokio::test]
    async fn test_rejects_wrong_pdu_type() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let target = tokio::spawn(async move { accept(&mut b, &QueuePairConfig::default()).await });

        let cmd = PduHeader::CapsuleCmd(crate::capsule::Sqe::new(0x01, 1));
        a.write_all(&construct_pdu(&cmd, PduFlags::NONE, &[], &Framing::default()))
            .await
            .unwrap();
        let err = target.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            QueuePairError::Protocol(PduError::InvalidHeaderField {
                offset: OFFSET_PDU_TYPE
            })
        ));
    }
}
