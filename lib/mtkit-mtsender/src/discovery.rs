// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::errors::InvocationError;
use crate::request::{Request, RequestHandle};
use log::info;
use mtkit_session::{ContextHandle, DatacenterAddressSet};
use mtkit_tl_types::Serialization;

/// Ask the server for every datacenter address it knows, and store them in
/// the context.
///
/// Returns how many datacenters were updated.
pub async fn fetch_address_sets(
    requests: &RequestHandle,
    serialization: &dyn Serialization,
    context: &ContextHandle,
) -> Result<usize, InvocationError> {
    let request = Request::new(serialization.datacenter_address_list_request()).high_priority(true);
    let response = requests.invoke_request(request).await?;
    let options = serialization.parse_datacenter_address_list(&response)?;

    let sets = DatacenterAddressSet::from_options(options);
    let count = sets.len();
    info!("got addresses for {} datacenters", count);
    context
        .perform_batch_updates(move |batch| {
            for (dc_id, set) in sets {
                batch.update_address_set(dc_id, set);
            }
        })
        .await?;

    Ok(count)
}
