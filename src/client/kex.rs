use super::*;
use crate::cipher::SealingCipher;
use crate::kex;
use crate::negotiation;
use crate::negotiation::Select;

impl KexInit {
    pub fn client_parse(
        mut self,
        config: &Config,
        cipher: &mut SealingCipher,
        buf: &[u8],
        write_buffer: &mut SSHBuffer,
    ) -> Result<KexDhDone, Error> {
        debug!("client parse {:?} bytes", buf.len());
        let algo = {
            // read algorithms from packet.
            self.exchange.server_kex_init.extend(buf);
            negotiation::Client::read_kex(buf, &config.preferred)?
        };
        debug!("algo = {:?}", algo);
        if !self.sent {
            self.client_write(config, cipher, write_buffer)?
        }

        // In order to avoid an extra buffer, we reuse the
        // self.exchange.client_kex_init buffer to build the first
        // key-exchange packet, send it, then truncate the buffer back.
        let i0 = self.exchange.client_kex_init.len();
        let kex = kex::Algorithm::client_dh(
            algo.kex,
            &mut self.exchange.client_ephemeral,
            &mut self.exchange.client_kex_init,
        )?;

        cipher.write(&self.exchange.client_kex_init[i0..], write_buffer)?;
        self.exchange.client_kex_init.resize(i0);

        Ok(KexDhDone {
            exchange: self.exchange,
            names: algo,
            kex,
            session_id: self.session_id,
        })
    }

    pub fn client_write(
        &mut self,
        config: &Config,
        cipher: &mut SealingCipher,
        write_buffer: &mut SSHBuffer,
    ) -> Result<(), Error> {
        self.exchange.client_kex_init.clear();
        negotiation::write_kex(&config.preferred, &mut self.exchange.client_kex_init)?;
        self.sent = true;
        cipher.write(&self.exchange.client_kex_init, write_buffer)
    }
}
